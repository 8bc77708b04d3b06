//! Per-channel frame sequencing
//!
//! The firmware rejects or misorders frames whose sequence byte does not
//! advance, so every frame consumes a fresh number on its channel. Counters
//! wrap at 256 and are only reset by building a new sequencer (a new link).

use crate::characteristics;

/// Logical command channels that carry sequenced frames
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    Drive,
    Command,
    Emergency,
}

impl Channel {
    pub const ALL: [Channel; 3] = [Channel::Drive, Channel::Command, Channel::Emergency];

    /// Characteristic short id this channel is written to
    pub fn characteristic(&self) -> &'static str {
        match self {
            Channel::Drive => characteristics::DRIVE,
            Channel::Command => characteristics::COMMAND,
            Channel::Emergency => characteristics::EMERGENCY,
        }
    }

    fn index(&self) -> usize {
        match self {
            Channel::Drive => 0,
            Channel::Command => 1,
            Channel::Emergency => 2,
        }
    }
}

impl std::fmt::Display for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Channel::Drive => write!(f, "drive"),
            Channel::Command => write!(f, "command"),
            Channel::Emergency => write!(f, "emergency"),
        }
    }
}

/// Three independent wrapping 8-bit counters
#[derive(Debug, Default, Clone)]
pub struct ChannelSequencer {
    counters: [u8; 3],
}

impl ChannelSequencer {
    /// Create a sequencer with every counter at 0
    pub fn new() -> Self {
        Self::default()
    }

    /// Consume the current number for `channel` and advance it
    pub fn next(&mut self, channel: Channel) -> u8 {
        let counter = &mut self.counters[channel.index()];
        let seq = *counter;
        *counter = counter.wrapping_add(1);
        seq
    }

    /// Peek at the number the next frame on `channel` will carry
    pub fn peek(&self, channel: Channel) -> u8 {
        self.counters[channel.index()]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_starts_at_zero() {
        let mut seq = ChannelSequencer::new();
        for channel in Channel::ALL {
            assert_eq!(seq.next(channel), 0);
        }
    }

    #[test]
    fn test_channels_are_independent() {
        let mut seq = ChannelSequencer::new();
        assert_eq!(seq.next(Channel::Command), 0);
        assert_eq!(seq.next(Channel::Command), 1);
        assert_eq!(seq.next(Channel::Drive), 0);
        assert_eq!(seq.peek(Channel::Emergency), 0);
        assert_eq!(seq.peek(Channel::Command), 2);
    }

    #[test]
    fn test_wraps_at_256() {
        let mut seq = ChannelSequencer::new();
        for _ in 0..255 {
            seq.next(Channel::Drive);
        }
        assert_eq!(seq.next(Channel::Drive), 255);
        assert_eq!(seq.next(Channel::Drive), 0);
    }

    proptest! {
        #[test]
        fn prop_sequence_is_contiguous_mod_256(
            warmup in 0usize..600,
            count in 1usize..300,
            channel_idx in 0usize..3,
        ) {
            let channel = Channel::ALL[channel_idx];
            let mut seq = ChannelSequencer::new();
            for _ in 0..warmup {
                seq.next(channel);
            }

            let s0 = seq.peek(channel);
            let taken: Vec<u8> = (0..count).map(|_| seq.next(channel)).collect();

            for (i, value) in taken.iter().enumerate() {
                prop_assert_eq!(*value, s0.wrapping_add(i as u8));
            }

            // no repeats before wraparound
            let window = count.min(256);
            let mut seen = std::collections::HashSet::new();
            for value in &taken[..window] {
                prop_assert!(seen.insert(*value));
            }
        }
    }
}
