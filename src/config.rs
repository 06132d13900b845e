//! Engine-wide tuning knobs (§3 "Config").

/// Congestion-control posture for the unistream/datagram send path's
/// `should_skip` policy hook (§4.6, §6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CongestionControlMode {
    /// Never skip objects; send everything regardless of queue pressure.
    None,
    /// Skip an object once its queued delay crosses a threshold.
    Delay,
    /// Skip to the newest group once a newer one is ready to send.
    Group,
    /// Like `Group`, but also drops any partially-sent object from the
    /// group being abandoned.
    GroupStrict,
    /// Never send anything but the newest object; the most aggressive
    /// policy, for a pure best-effort live feed.
    ZeroStrict,
}

/// Tuning knobs for the ack/horizon engine and cache (§3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Config {
    /// Upper bound, in microseconds, on how long a completed object stays
    /// in the fragment cache before it's eligible for eviction.
    pub cache_duration_max: u64,
    /// Delay, in microseconds, before an extra repeat fires after being
    /// scheduled; `0` disables the feature (§4.4).
    pub extra_repeat_delay: u64,
    /// Whether a NACK also schedules an extra repeat, on top of the
    /// immediate retransmit (§4.4 `handle_lost`).
    pub extra_repeat_on_nack: bool,
    /// Whether a datagram whose `queue_delay` exceeds the threshold also
    /// schedules an extra repeat at `ack_init` time (§4.4).
    pub extra_repeat_after_received_delayed: bool,
    /// How the unistream/datagram send path reacts to congestion.
    pub congestion_control_mode: CongestionControlMode,
}

impl Default for Config {
    /// The quicrq-style defaults: extra repeat disabled, no congestion
    /// control.
    fn default() -> Self {
        Self {
            cache_duration_max: 10_000_000,
            extra_repeat_delay: 0,
            extra_repeat_on_nack: false,
            extra_repeat_after_received_delayed: false,
            congestion_control_mode: CongestionControlMode::None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_sane() {
        let config = Config::default();
        assert!(config.cache_duration_max > 0);
        assert_eq!(config.congestion_control_mode, CongestionControlMode::None);
        assert_eq!(config.extra_repeat_delay, 0);
        assert!(!config.extra_repeat_on_nack);
        assert!(!config.extra_repeat_after_received_delayed);
    }
}
