use wmidi::Channel;

/// Which MIDI channels the device listens to. Messages on other channels are ignored.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub enum ChannelFilter {
    /// Every channel.
    #[default]
    Omni,
    /// A single channel.
    Only(Channel),
}

impl ChannelFilter {
    /// Returns `true` if messages on `channel` should be acted upon.
    pub fn accepts(&self, channel: Channel) -> bool {
        match self {
            Self::Omni => true,
            Self::Only(only) => *only == channel,
        }
    }
}

#[cfg(feature = "defmt")]
impl defmt::Format for ChannelFilter {
    fn format(&self, fmt: defmt::Formatter) {
        match self {
            Self::Omni => defmt::write!(fmt, "Omni"),
            Self::Only(channel) => defmt::write!(fmt, "Only({})", channel.number()),
        }
    }
}
