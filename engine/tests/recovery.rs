mod common;

#[cfg(test)]
mod tests {
    use super::common::*;
    use std::sync::atomic::Ordering;
    use std::time::Duration;
    use uacstream_engine::host::SAMPLE_RATE_CHANGED;
    use uacstream_engine::hw::sim::{CaptureSource, SimDeviceConfig, simulated_device};
    use uacstream_engine::{
        BufferRequest, Driver, DriverError, DriverOptions, DriverState, HostDriver, HostMessage,
        MemorySettingsStore,
    };

    const FRAMES: u32 = 480;
    const SETTLE: Duration = Duration::from_millis(100);
    const TIMEOUT: Duration = Duration::from_secs(5);

    fn rig_with(options: DriverOptions) -> Rig {
        Rig::with(RigOptions {
            options: DriverOptions {
                realtime: false,
                ..options
            },
            ..RigOptions::default()
        })
    }

    #[test]
    fn watchdog_requests_reset_while_stream_is_stalled() {
        let mut rig = rig_with(DriverOptions {
            watchdog_interval_ms: 100,
            ..DriverOptions::default()
        });
        let host = RecordingHost::new(true);
        rig.prepare(FRAMES, &host);
        rig.driver.start().unwrap();

        wait_until("first watchdog reset", TIMEOUT, || host.reset_requests() >= 1);
        wait_until("watchdog re-armed", TIMEOUT, || host.reset_requests() >= 2);
        let stats = rig.driver.stats();
        assert!(stats.watchdog_resets >= 2);
        assert!(stats.resets >= 2);
        assert_eq!(rig.driver.state(), DriverState::Running);

        rig.run_cycles(&host, 1);
        rig.driver.stop().unwrap();
        std::thread::sleep(SETTLE);
        let settled = rig.driver.stats().watchdog_resets;
        std::thread::sleep(Duration::from_millis(300));
        assert_eq!(rig.driver.stats().watchdog_resets, settled);
    }

    #[test]
    fn completions_keep_watchdog_quiet() {
        let mut rig = rig_with(DriverOptions {
            watchdog_interval_ms: 200,
            ..DriverOptions::default()
        });
        let host = RecordingHost::new(true);
        rig.prepare(FRAMES, &host);
        rig.driver.start().unwrap();
        for _ in 0..10 {
            rig.run_cycles(&host, 1);
            std::thread::sleep(Duration::from_millis(40));
        }
        assert_eq!(rig.driver.stats().watchdog_resets, 0);
        assert_eq!(host.reset_requests(), 0);
    }

    #[test]
    fn device_rate_change_notifies_host() {
        let mut rig = Rig::new();
        let host = RecordingHost::new(true);
        rig.prepare(FRAMES, &host);
        rig.driver.start().unwrap();

        rig.device.rate.store(44_100, Ordering::SeqCst);
        rig.device.notifier().clock_rate_changed.signal();
        wait_until("rate change callback", TIMEOUT, || {
            !host.rate_changes.lock().unwrap().is_empty()
        });
        assert_eq!(*host.rate_changes.lock().unwrap(), vec![44_100.0]);
        wait_until("reset request", TIMEOUT, || host.reset_requests() == 1);
        assert_eq!(rig.driver.sample_rate(), Ok(44_100));
        assert!(rig.device.rate_calls.lock().unwrap().is_empty());

        rig.run_cycles(&host, 1);
        let info = host.switches.lock().unwrap()[0].info.unwrap();
        assert_ne!(info.flags & SAMPLE_RATE_CHANGED, 0);
    }

    #[test]
    fn unsupported_device_rate_is_ignored() {
        let mut rig = Rig::new();
        let host = RecordingHost::new(true);
        rig.prepare(FRAMES, &host);
        rig.driver.start().unwrap();

        rig.device.rate.store(96_000, Ordering::SeqCst);
        rig.device.notifier().clock_rate_changed.signal();
        std::thread::sleep(SETTLE);
        assert_eq!(rig.driver.sample_rate(), Ok(48_000));
        assert!(host.rate_changes.lock().unwrap().is_empty());
        assert_eq!(rig.driver.stats().resets, 0);
    }

    #[test]
    fn device_rate_change_without_buffers_only_reselects() {
        let mut rig = Rig::new();
        rig.driver.init().unwrap();
        rig.device.rate.store(44_100, Ordering::SeqCst);
        rig.device.notifier().clock_rate_changed.signal();
        wait_until("rate reselected", TIMEOUT, || {
            rig.driver.sample_rate() == Ok(44_100)
        });
        assert_eq!(rig.driver.buffer_size().unwrap().min, 45);
    }

    #[test]
    fn accepted_resync_needs_no_reset() {
        let mut rig = Rig::new();
        let host = RecordingHost::new(true);
        host.resync_answer.store(1, Ordering::SeqCst);
        rig.prepare(FRAMES, &host);
        rig.driver.start().unwrap();

        rig.device.notifier().resync_requested.signal();
        wait_until("resync message", TIMEOUT, || {
            host.messages
                .lock()
                .unwrap()
                .contains(&HostMessage::ResyncRequest)
        });
        std::thread::sleep(SETTLE);
        assert_eq!(rig.driver.stats().resets, 0);
        assert_eq!(host.reset_requests(), 0);
    }

    #[test]
    fn declined_resync_falls_back_to_reset() {
        let mut rig = Rig::new();
        let host = RecordingHost::new(true);
        rig.prepare(FRAMES, &host);
        rig.driver.start().unwrap();

        rig.device.notifier().resync_requested.signal();
        wait_until("reset request", TIMEOUT, || host.reset_requests() == 1);
        assert!(host
            .messages
            .lock()
            .unwrap()
            .contains(&HostMessage::ResyncRequest));
    }

    #[test]
    fn resync_without_notify_option_resets_directly() {
        let mut rig = rig_with(DriverOptions {
            resync_notify: false,
            ..DriverOptions::default()
        });
        let host = RecordingHost::new(true);
        host.resync_answer.store(1, Ordering::SeqCst);
        rig.prepare(FRAMES, &host);
        rig.driver.start().unwrap();

        rig.device.notifier().resync_requested.signal();
        wait_until("reset request", TIMEOUT, || host.reset_requests() == 1);
        assert!(!host
            .messages
            .lock()
            .unwrap()
            .contains(&HostMessage::ResyncRequest));
    }

    #[test]
    fn resync_is_ignored_when_not_streaming() {
        let mut rig = Rig::new();
        let host = RecordingHost::new(true);
        rig.prepare(FRAMES, &host);
        rig.device.notifier().resync_requested.signal();
        std::thread::sleep(SETTLE);
        assert!(host.messages.lock().unwrap().iter().all(|m| !matches!(
            m,
            HostMessage::ResyncRequest | HostMessage::ResetRequest
        )));
    }

    #[test]
    fn rate_request_while_prepared_is_applied_on_reset() {
        let mut rig = Rig::new();
        let host = RecordingHost::new(true);
        rig.prepare(FRAMES, &host);
        rig.driver.set_sample_rate(44_100).unwrap();
        wait_until("device reprogrammed", TIMEOUT, || {
            *rig.device.rate_calls.lock().unwrap() == vec![44_100]
        });
        wait_until("reset request", TIMEOUT, || host.reset_requests() == 1);

        rig.driver.dispose_buffers().unwrap();
        let infos = rig
            .driver
            .create_buffers(
                &[BufferRequest::output(0), BufferRequest::input(0)],
                441,
                host.clone(),
            )
            .unwrap();
        *host.buffers.lock().unwrap() = infos;
        rig.driver.start().unwrap();
        rig.run_cycles(&host, 1);
        let info = host.switches.lock().unwrap()[0].info.unwrap();
        assert_eq!(info.sample_rate, 44_100.0);
        assert_eq!(info.flags & SAMPLE_RATE_CHANGED, 0);
        assert_eq!(rig.render.log().format.unwrap().sample_rate, 44_100);
    }

    #[test]
    fn own_rate_change_is_not_reported_as_device_change() {
        let mut rig = Rig::new();
        rig.device.interrupt_on_rate.store(true, Ordering::SeqCst);
        let host = RecordingHost::new(true);
        rig.prepare(FRAMES, &host);

        rig.driver.set_sample_rate(44_100).unwrap();
        wait_until("reset request", TIMEOUT, || host.reset_requests() == 1);
        std::thread::sleep(SETTLE * 3);
        assert!(host.rate_changes.lock().unwrap().is_empty());
        assert_eq!(host.reset_requests(), 1);
        assert_eq!(rig.driver.stats().resets, 1);
        assert_eq!(rig.driver.sample_rate(), Ok(44_100));
    }

    #[test]
    fn refused_rate_keeps_previous_selection() {
        let mut rig = Rig::new();
        rig.driver.init().unwrap();
        rig.device.refuse_rates.store(true, Ordering::SeqCst);
        assert!(matches!(
            rig.driver.set_sample_rate(44_100),
            Err(DriverError::HwMalfunction(_))
        ));
        assert_eq!(rig.driver.sample_rate(), Ok(48_000));
        assert_eq!(rig.driver.buffer_size().unwrap().min, 48);

        let host = RecordingHost::new(true);
        let infos = rig
            .driver
            .create_buffers(&[BufferRequest::output(0)], FRAMES, host.clone())
            .unwrap();
        *host.buffers.lock().unwrap() = infos;
        rig.driver.set_sample_rate(44_100).unwrap();
        wait_until("reset request", TIMEOUT, || host.reset_requests() == 1);
        assert_eq!(rig.driver.sample_rate(), Ok(48_000));
    }

    #[test]
    fn latest_rate_request_wins() {
        let mut rig = Rig::new();
        let host = RecordingHost::new(true);
        rig.prepare(FRAMES, &host);

        rig.driver.set_sample_rate(44_100).unwrap();
        rig.driver.set_sample_rate(48_000).unwrap();
        wait_until("reset handled", TIMEOUT, || rig.driver.stats().resets >= 1);
        std::thread::sleep(SETTLE);
        assert_eq!(rig.driver.sample_rate(), Ok(48_000));
        assert_eq!(rig.device.rate.load(Ordering::SeqCst), 48_000);
    }

    #[test]
    fn simulated_device_streams_in_real_time() {
        let config = SimDeviceConfig {
            capture: CaptureSource::Loopback,
            ..SimDeviceConfig::default()
        };
        let (description, device) = simulated_device(&config);
        let mut driver = Driver::new(
            description,
            Box::new(MemorySettingsStore::new()),
            DriverOptions {
                realtime: false,
                ..DriverOptions::default()
            },
        );
        let host = RecordingHost::new(true);
        driver.init().unwrap();
        let infos = driver
            .create_buffers(
                &[
                    BufferRequest::output(0),
                    BufferRequest::output(1),
                    BufferRequest::input(0),
                    BufferRequest::input(1),
                ],
                FRAMES,
                host.clone(),
            )
            .unwrap();
        *host.buffers.lock().unwrap() = infos;
        *host.output_fill.lock().unwrap() = 0x40;
        driver.start().unwrap();

        wait_until("simulated switches", TIMEOUT, || host.switch_count() >= 10);
        wait_until("loopback audio", TIMEOUT, || {
            host.switches.lock().unwrap().iter().any(|s| s.input_nonzero)
        });
        let positions: Vec<u64> = host
            .switches
            .lock()
            .unwrap()
            .iter()
            .filter_map(|s| s.info.map(|i| i.sample_position))
            .collect();
        assert!(positions.windows(2).all(|w| w[1] == w[0] + FRAMES as u64));

        device.change_rate_externally(96_000);
        wait_until("rate change callback", TIMEOUT, || {
            *host.rate_changes.lock().unwrap() == vec![96_000.0]
        });
        wait_until("reset request", TIMEOUT, || host.reset_requests() >= 1);

        driver.stop().unwrap();
        driver.dispose_buffers().unwrap();
        assert_eq!(driver.state(), DriverState::Initialized);
    }
}
