use std::time::Duration;

#[derive(Debug, Clone)]
pub struct MonitorConfig {
    pub headless: bool,
    pub viewport: Option<(u32, u32)>,
    /// How often the page's event queue is drained and the probe refreshed.
    pub probe_interval: Duration,
    /// How long a page is watched before the monitor detaches.
    pub run_duration: Duration,
    pub navigation_timeout: Duration,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            headless: true,
            viewport: Some((1280, 720)),
            probe_interval: Duration::from_millis(50),
            run_duration: Duration::from_secs(30),
            navigation_timeout: Duration::from_secs(30),
        }
    }
}

impl MonitorConfig {
    pub fn with_headless(mut self, headless: bool) -> Self {
        self.headless = headless;
        self
    }

    pub fn with_viewport(mut self, width: u32, height: u32) -> Self {
        self.viewport = Some((width, height));
        self
    }

    pub fn with_probe_interval(mut self, ms: u64) -> Self {
        self.probe_interval = Duration::from_millis(ms);
        self
    }

    pub fn with_run_duration(mut self, ms: u64) -> Self {
        self.run_duration = Duration::from_millis(ms);
        self
    }

    pub fn fast() -> Self {
        Self {
            probe_interval: Duration::from_millis(25),
            run_duration: Duration::from_secs(15),
            navigation_timeout: Duration::from_secs(20),
            ..Self::default()
        }
    }

    pub fn patient() -> Self {
        Self {
            probe_interval: Duration::from_millis(100),
            run_duration: Duration::from_secs(120),
            navigation_timeout: Duration::from_secs(60),
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn presets_and_builders() {
        assert!(MonitorConfig::fast().probe_interval < MonitorConfig::patient().probe_interval);
        let config = MonitorConfig::default()
            .with_headless(false)
            .with_viewport(1920, 1080)
            .with_run_duration(5000);
        assert!(!config.headless);
        assert_eq!(config.viewport, Some((1920, 1080)));
        assert_eq!(config.run_duration, Duration::from_secs(5));
    }
}
