//! Top-level orchestration
//
// https://github.com/rust-iot/rust-shadow
// Copyright 2024 Ryan Kurte

use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;

use log::{debug, error, info, warn};
use tokio::sync::{broadcast, Mutex};

use crate::capture::{CaptureEngine, CaptureState, CaptureStats, Handshake};
use crate::classify::{Classifier, ClassifierStats, Event, ProbeEvent};
use crate::config::{Config, Mode};
use crate::deauth::DeauthEmitter;
use crate::error::Error;
use crate::frame::MacAddr;
use crate::hopper::ChannelHopper;
use crate::radio::{MonitorHandle, RadioControl};
use crate::source::{FrameBus, FrameEvent, FrameSource, Injector, RawFrame};
use crate::store::{AccessPoint, ObservationStore, ProbeRecord, Station};
use crate::timer::Timer;

/// Orchestrator state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum DeviceState {
    Initializing,
    Setup,
    Idle,
    Scanning,
    Capturing,
    Stopped,
    Error,
}

/// Typed events published to collaborators (display, web surface)
#[derive(Debug, Clone, PartialEq)]
pub enum ReconEvent {
    NewAp(AccessPoint),
    NewStation(Station),
    Probe(ProbeEvent),
    Handshake(Handshake),
    StateChanged(DeviceState),
    ModeChanged(Mode),
}

/// Status snapshot served to the query surface
#[derive(Debug, Clone, PartialEq)]
pub struct Status {
    pub state: DeviceState,
    pub mode: Mode,
    pub uptime_s: u64,
    pub ap_count: usize,
    pub client_count: usize,
    pub probe_count: usize,
    pub handshake_count: usize,
    pub battery_percent: u8,
    pub target_ssid: Option<String>,
    pub channel: Option<u8>,
    pub frames: u64,
    pub frames_dropped: u64,
}

struct Shared {
    state: DeviceState,
    mode: Mode,
    target: Option<(MacAddr, String)>,
    monitor: Option<MonitorHandle>,
    transitioning: bool,
    battery_percent: u8,
    frames_dropped: u64,
    source_lost: Option<String>,
    recovery_attempted: bool,
    setup_deadline: Option<u64>,
    pipeline_spawned: bool,
    handshakes: Vec<Handshake>,
}

/// Frame-path state shared with the pipeline task. All access is brief
/// and synchronous; nothing here is held across an await.
struct Pipeline<T> {
    classifier: RefCell<Classifier>,
    store: RefCell<ObservationStore<T>>,
    engine: RefCell<CaptureEngine<T>>,
    shared: RefCell<Shared>,
    events: broadcast::Sender<ReconEvent>,
}

impl<T: Timer> Pipeline<T> {
    /// Apply one captured frame to the model. Events emitted from the
    /// same frame are atomic with respect to the store.
    fn handle(&self, raw: &RawFrame) {
        let event = self.classifier.borrow_mut().classify(raw);

        match event {
            Event::Beacon(beacon) => {
                let is_new = self.store.borrow_mut().upsert_ap(&beacon);
                if is_new {
                    if let Some(ap) = self.store.borrow().get_ap(&beacon.bssid) {
                        let _ = self.events.send(ReconEvent::NewAp(ap));
                    }
                }
            }
            Event::Probe(probe) => {
                let is_new = self.store.borrow_mut().record_probe(&probe);
                let _ = self.events.send(ReconEvent::Probe(probe.clone()));
                if is_new {
                    if let Some(station) = self.store.borrow().get_station(&probe.client) {
                        let _ = self.events.send(ReconEvent::NewStation(station));
                    }
                }
            }
            Event::Data(data) => {
                let is_new = self.store.borrow_mut().record_data(&data);
                if is_new {
                    if let Some(station) = self.store.borrow().get_station(&data.client) {
                        let _ = self.events.send(ReconEvent::NewStation(station));
                    }
                }
            }
            Event::Eapol(eapol) => {
                let handshake = self.engine.borrow_mut().on_eapol(&eapol);
                if let Some(handshake) = handshake {
                    self.shared
                        .borrow_mut()
                        .handshakes
                        .push(handshake.clone());
                    let _ = self.events.send(ReconEvent::Handshake(handshake));
                }
            }
            Event::Ignore => (),
        }
    }
}

/// Releases the command serialization guard on drop
struct TransitionGuard<T> {
    pipeline: Rc<Pipeline<T>>,
}

impl<T> Drop for TransitionGuard<T> {
    fn drop(&mut self) {
        self.pipeline.shared.borrow_mut().transitioning = false;
    }
}

/// Top-level state machine binding the radio, hopper, frame pipeline,
/// capture engine and deauth emitter.
///
/// Commands are serialized: one in-flight transition at a time, late
/// arrivals are rejected with [`Error::Busy`].
pub struct Orchestrator<R, S, J, T> {
    config: Config,
    timer: T,
    radio: Rc<Mutex<R>>,
    source: Rc<RefCell<S>>,
    injector: Rc<RefCell<J>>,
    hopper: ChannelHopper<R>,
    deauth: DeauthEmitter<J, T>,
    bus: FrameBus,
    pipeline: Rc<Pipeline<T>>,
    started_at: u64,
}

impl<R, S, J, T> Orchestrator<R, S, J, T>
where
    R: RadioControl + 'static,
    S: FrameSource + 'static,
    J: Injector + 'static,
    T: Timer + Clone + 'static,
{
    pub fn new(config: Config, radio: R, source: S, injector: J, timer: T) -> Self {
        let radio = Rc::new(Mutex::new(radio));
        let injector = Rc::new(RefCell::new(injector));
        let (events, _) = broadcast::channel(64);

        let hopper = ChannelHopper::new(
            radio.clone(),
            config.scan.all_channels(),
            config.scan.hop_interval_ms,
            config.scan.randomize_hops,
        );

        let deauth = DeauthEmitter::new(injector.clone(), timer.clone());

        let pipeline = Rc::new(Pipeline {
            classifier: RefCell::new(Classifier::new()),
            store: RefCell::new(ObservationStore::new(
                timer.clone(),
                config.scan.probe_ring_capacity,
            )),
            engine: RefCell::new(CaptureEngine::new(
                timer.clone(),
                config.capture.captures_dir.clone(),
                config.capture.timeout_s,
            )),
            shared: RefCell::new(Shared {
                state: DeviceState::Initializing,
                mode: config.autostart.mode,
                target: None,
                monitor: None,
                transitioning: false,
                battery_percent: 100,
                frames_dropped: 0,
                source_lost: None,
                recovery_attempted: false,
                setup_deadline: None,
                pipeline_spawned: false,
                handshakes: Vec::new(),
            }),
            events,
        });

        let started_at = timer.ticks_ms();
        let bus = FrameBus::new(config.scan.frame_queue_depth);

        Self {
            config,
            timer,
            radio,
            source: Rc::new(RefCell::new(source)),
            injector,
            hopper,
            deauth,
            bus,
            pipeline,
            started_at,
        }
    }

    /// Subscribe to the typed event stream
    pub fn subscribe(&self) -> broadcast::Receiver<ReconEvent> {
        self.pipeline.events.subscribe()
    }

    pub fn state(&self) -> DeviceState {
        self.pipeline.shared.borrow().state
    }

    pub fn mode(&self) -> Mode {
        self.pipeline.shared.borrow().mode
    }

    pub fn target(&self) -> Option<(MacAddr, String)> {
        self.pipeline.shared.borrow().target.clone()
    }

    /// Snapshot of discovered APs, strongest first
    pub fn aps(&self) -> Vec<AccessPoint> {
        self.pipeline.store.borrow().aps()
    }

    /// Snapshot of discovered stations
    pub fn stations(&self) -> Vec<Station> {
        self.pipeline.store.borrow().stations()
    }

    /// Most recent probes, newest first
    pub fn probes(&self, n: usize) -> Vec<ProbeRecord> {
        self.pipeline.store.borrow().recent_probes(n)
    }

    /// All handshakes captured this run
    pub fn handshakes(&self) -> Vec<Handshake> {
        self.pipeline.shared.borrow().handshakes.clone()
    }

    /// Current capture session statistics
    pub fn capture_stats(&self) -> Option<CaptureStats> {
        self.pipeline.engine.borrow().stats()
    }

    pub fn classifier_stats(&self) -> ClassifierStats {
        self.pipeline.classifier.borrow().stats()
    }

    /// Battery level fed by the (external) battery monitor
    pub fn set_battery_percent(&self, percent: u8) {
        self.pipeline.shared.borrow_mut().battery_percent = percent.min(100);
    }

    /// Derived status snapshot; never exposes mutable state
    pub fn status(&self) -> Status {
        let shared = self.pipeline.shared.borrow();
        let (ap_count, client_count, probe_count) = self.pipeline.store.borrow().counts();
        let frames = self.pipeline.classifier.borrow().stats().frames;

        Status {
            state: shared.state,
            mode: shared.mode,
            uptime_s: (self.timer.ticks_ms().saturating_sub(self.started_at)) / 1000,
            ap_count,
            client_count,
            probe_count,
            handshake_count: shared.handshakes.len(),
            battery_percent: shared.battery_percent,
            target_ssid: shared.target.as_ref().map(|(_, ssid)| ssid.clone()),
            channel: self.hopper.current(),
            frames,
            frames_dropped: shared.frames_dropped,
        }
    }

    fn begin_transition(&self) -> Result<TransitionGuard<T>, Error> {
        let mut shared = self.pipeline.shared.borrow_mut();

        if shared.transitioning {
            return Err(Error::Busy);
        }

        shared.transitioning = true;
        Ok(TransitionGuard {
            pipeline: self.pipeline.clone(),
        })
    }

    fn set_state(&self, state: DeviceState) {
        let changed = {
            let mut shared = self.pipeline.shared.borrow_mut();
            let changed = shared.state != state;
            shared.state = state;
            changed
        };

        if changed {
            debug!("State -> {}", state);
            let _ = self.pipeline.events.send(ReconEvent::StateChanged(state));
        }
    }

    /// Bring up the components: setup AP when configured, otherwise
    /// straight to monitor mode and idle
    pub async fn initialize(&self) -> Result<(), Error> {
        let _guard = self.begin_transition()?;

        info!("Initializing (mode: {})", self.mode());

        // Drop mode never raises the setup AP
        if self.config.ap.enabled && self.mode() != Mode::Drop {
            self.enter_setup().await
        } else {
            self.enter_monitor().await?;
            self.set_state(DeviceState::Idle);
            Ok(())
        }
    }

    async fn enter_setup(&self) -> Result<(), Error> {
        let ssid = self.config.ap.generate_ssid();

        let result = self
            .radio
            .lock()
            .await
            .enter_ap(
                &ssid,
                &self.config.ap.password,
                self.config.ap.channel,
                self.config.ap.hidden,
            )
            .await;

        if let Err(e) = result {
            self.set_state(DeviceState::Error);
            return Err(e);
        }

        let deadline = self.timer.ticks_ms() + self.config.ap.setup_timeout_s * 1000;
        self.pipeline.shared.borrow_mut().setup_deadline = Some(deadline);

        self.set_state(DeviceState::Setup);

        info!(
            "Setup AP {} up, auto-switching to monitor in {}s",
            ssid, self.config.ap.setup_timeout_s
        );

        Ok(())
    }

    async fn enter_monitor(&self) -> Result<(), Error> {
        let result = self.radio.lock().await.enter_monitor().await;

        let handle = match result {
            Ok(handle) => handle,
            Err(e) => {
                self.set_state(DeviceState::Error);
                return Err(e);
            }
        };

        self.injector.borrow_mut().attach(&handle.interface);
        self.pipeline.shared.borrow_mut().monitor = Some(handle);

        Ok(())
    }

    /// Start scanning: leave setup if needed, start the frame source,
    /// pipeline and hopper
    pub async fn start_scanning(&self) -> Result<(), Error> {
        let _guard = self.begin_transition()?;

        match self.state() {
            DeviceState::Scanning => return Ok(()),
            DeviceState::Initializing | DeviceState::Setup | DeviceState::Idle => (),
            _ => return Err(Error::Busy),
        }

        if self.state() == DeviceState::Setup {
            self.pipeline.shared.borrow_mut().setup_deadline = None;
        }

        // Monitor entry also tears down the setup AP services
        let need_monitor = self.pipeline.shared.borrow().monitor.is_none()
            || self.state() == DeviceState::Setup;
        if need_monitor {
            self.enter_monitor().await?;
        }

        self.spawn_pipeline();
        self.start_source()?;
        self.hopper.start();

        self.set_state(DeviceState::Scanning);

        Ok(())
    }

    fn start_source(&self) -> Result<(), Error> {
        let monitor = self
            .pipeline
            .shared
            .borrow()
            .monitor
            .clone()
            .ok_or_else(|| Error::RadioUnavailable("no monitor interface".into()))?;

        self.source
            .borrow_mut()
            .start(&monitor, self.bus.clone())
            .map_err(|e| {
                self.set_state(DeviceState::Error);
                e
            })
    }

    /// Spawn the frame pipeline task once; it survives source restarts
    fn spawn_pipeline(&self) {
        {
            let mut shared = self.pipeline.shared.borrow_mut();
            if shared.pipeline_spawned {
                return;
            }
            shared.pipeline_spawned = true;
        }

        let pipeline = self.pipeline.clone();
        let mut rx = self.bus.subscribe();

        tokio::task::spawn_local(async move {
            loop {
                match rx.recv().await {
                    Ok(FrameEvent::Frame(raw)) => pipeline.handle(&raw),
                    Ok(FrameEvent::Lost(reason)) => {
                        warn!("Frame source lost: {}", reason);
                        pipeline.shared.borrow_mut().source_lost = Some(reason);
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        pipeline.shared.borrow_mut().frames_dropped += n;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });
    }

    /// Change operation mode; an in-flight capture is stopped first
    pub async fn set_mode(&self, mode: Mode) -> Result<(), Error> {
        if mode == self.mode() {
            return Ok(());
        }

        let _guard = self.begin_transition()?;

        info!("Changing mode: {} -> {}", self.mode(), mode);

        if self.state() == DeviceState::Capturing {
            self.stop_capture_inner();
        }

        self.pipeline.shared.borrow_mut().mode = mode;
        let _ = self.pipeline.events.send(ReconEvent::ModeChanged(mode));

        Ok(())
    }

    /// Remember a capture target. Passive mode ignores this.
    pub fn set_target(&self, bssid: MacAddr, ssid: &str) -> Result<(), Error> {
        if self.mode() == Mode::Passive {
            warn!("Ignoring target in passive mode: {}", ssid);
            return Ok(());
        }

        if bssid.is_broadcast() {
            warn!("Ignoring broadcast target");
            return Ok(());
        }

        info!("Target set: {} ({})", ssid, bssid);
        self.pipeline.shared.borrow_mut().target = Some((bssid, ssid.to_string()));

        Ok(())
    }

    /// Start a capture for the current target: pin the channel, arm the
    /// engine, enter the capturing state
    pub async fn start_capture(&self) -> Result<(), Error> {
        let _guard = self.begin_transition()?;

        if self.state() != DeviceState::Scanning {
            return Err(Error::Busy);
        }

        let (bssid, ssid) = self.target().ok_or(Error::NoTarget)?;

        let channel = self
            .pipeline
            .store
            .borrow()
            .get_ap(&bssid)
            .map(|ap| ap.channel);

        // The capture must not start before the pin is acknowledged
        match channel {
            Some(ch) => {
                if let Err(e) = self.hopper.pin(ch, None).await {
                    self.set_state(DeviceState::Error);
                    return Err(e);
                }
            }
            None => warn!("Target {} not yet observed, capturing unpinned", bssid),
        }

        self.pipeline
            .engine
            .borrow_mut()
            .set_target(bssid, &ssid, channel)?;

        self.set_state(DeviceState::Capturing);

        Ok(())
    }

    /// Stop the capture and resume scanning
    pub async fn stop_capture(&self) -> Result<(), Error> {
        let _guard = self.begin_transition()?;
        self.stop_capture_inner();
        Ok(())
    }

    fn stop_capture_inner(&self) {
        self.pipeline.engine.borrow_mut().stop();
        self.hopper.resume();

        if self.state() == DeviceState::Capturing {
            self.set_state(DeviceState::Scanning);
        }
    }

    /// Send a deauth burst. Refused in drop mode unless configured
    /// otherwise.
    pub async fn send_deauth(
        &self,
        bssid: MacAddr,
        client: Option<MacAddr>,
    ) -> Result<u64, Error> {
        if self.mode() == Mode::Drop && !self.config.capture.allow_deauth_in_drop {
            return Err(Error::InvalidMode("no deauth in drop mode".to_string()));
        }

        let sent = self
            .deauth
            .burst(
                bssid,
                client,
                self.config.capture.deauth_count,
                Duration::from_millis(self.config.capture.deauth_interval_ms),
            )
            .await?;

        // Attribute frames sent on behalf of the active session
        let mut engine = self.pipeline.engine.borrow_mut();
        if engine.target().map(|(b, _)| b) == Some(bssid) {
            engine.note_deauth(sent);
        }

        Ok(sent)
    }

    /// Return to the setup AP for reconfiguration
    pub async fn return_to_setup(&self) -> Result<(), Error> {
        let _guard = self.begin_transition()?;

        info!("Returning to setup");

        self.pipeline.engine.borrow_mut().stop();
        self.hopper.stop();
        self.source.borrow_mut().stop();

        // Failures restoring managed mode are reported, not fatal
        if let Err(e) = self.radio.lock().await.enter_managed().await {
            warn!("Managed restore failed: {}", e);
        }
        self.pipeline.shared.borrow_mut().monitor = None;

        self.enter_setup().await
    }

    /// Graceful teardown
    pub async fn stop(&self) -> Result<(), Error> {
        let _guard = self.begin_transition()?;

        info!("Stopping");

        self.deauth.stop();
        self.hopper.stop();
        self.source.borrow_mut().stop();
        self.pipeline.engine.borrow_mut().stop();

        if let Err(e) = self.radio.lock().await.enter_managed().await {
            warn!("Managed restore failed: {}", e);
        }

        self.set_state(DeviceState::Stopped);

        Ok(())
    }

    /// Periodic duties: setup timeout, capture deadline, auto capture
    /// control, source-loss recovery. The run loop calls this once a
    /// second; tests drive it directly.
    pub async fn tick(&self) -> Result<(), Error> {
        let now = self.timer.ticks_ms();

        // Setup timeout auto-switches to scanning
        let setup_expired = {
            let shared = self.pipeline.shared.borrow();
            shared.state == DeviceState::Setup
                && shared.setup_deadline.map(|d| now >= d).unwrap_or(false)
        };
        if setup_expired {
            info!("Setup timeout, switching to monitor");
            self.start_scanning().await?;
        }

        // Capture deadline
        let timed_out = self.pipeline.engine.borrow_mut().check_deadline();
        if timed_out {
            self.hopper.resume();
            if self.state() == DeviceState::Capturing {
                self.set_state(DeviceState::Scanning);
            }
        }

        // Auto-stop after success
        if self.state() == DeviceState::Capturing
            && self.config.capture.auto_stop
            && self.pipeline.engine.borrow().state() == CaptureState::Success
        {
            info!("Capture successful, stopping");
            self.stop_capture_inner();
        }

        // Auto-start in capture mode, one session per target
        if self.mode() == Mode::Capture
            && self.config.capture.auto_start
            && self.state() == DeviceState::Scanning
        {
            if let Some((bssid, ssid)) = self.target() {
                let already_tried = self
                    .pipeline
                    .engine
                    .borrow()
                    .stats()
                    .map(|s| s.target_bssid == bssid)
                    .unwrap_or(false);

                if !already_tried
                    && self
                        .config
                        .targets
                        .should_target(&ssid, &bssid.to_string())
                {
                    if let Err(e) = self.start_capture().await {
                        warn!("Auto-capture failed: {}", e);
                    }
                }
            }
        }

        // One-shot source recovery, second loss is fatal
        let lost = self.pipeline.shared.borrow_mut().source_lost.take();
        if let Some(reason) = lost {
            self.recover_source(&reason).await;
        }

        Ok(())
    }

    async fn recover_source(&self, reason: &str) {
        let attempted = {
            let mut shared = self.pipeline.shared.borrow_mut();
            let attempted = shared.recovery_attempted;
            shared.recovery_attempted = true;
            attempted
        };

        if attempted {
            error!("Frame source lost again ({}), giving up", reason);
            self.pipeline.engine.borrow_mut().fail();
            self.set_state(DeviceState::Error);
            return;
        }

        warn!("Frame source lost ({}), re-initializing radio", reason);

        self.source.borrow_mut().stop();

        let recovered = match self.enter_monitor().await {
            Ok(()) => self.start_source().is_ok(),
            Err(_) => false,
        };

        if recovered {
            info!("Frame source recovered");
        } else {
            error!("Frame source recovery failed");
            self.pipeline.engine.borrow_mut().fail();
            self.set_state(DeviceState::Error);
        }
    }

    /// Drive the orchestrator until stopped or failed
    pub async fn run(&self) {
        loop {
            match self.state() {
                DeviceState::Stopped | DeviceState::Error => return,
                _ => (),
            }

            if let Err(e) = self.tick().await {
                warn!("Tick error: {}", e);
            }

            tokio::time::sleep(Duration::from_secs(1)).await;
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::capture::CaptureKind;
    use crate::radio::mock::{MockInjector, MockRadio, RadioOp};
    use crate::source::ReplaySource;
    use crate::testkit::*;
    use crate::timer::mock::MockTimer;

    const AP: &str = "aa:bb:cc:dd:ee:01";
    const CLIENT: &str = "11:22:33:44:55:66";

    type TestOrchestrator = Orchestrator<MockRadio, ReplaySource, MockInjector, MockTimer>;

    struct Rig {
        orch: TestOrchestrator,
        radio: MockRadio,
        injector: MockInjector,
        timer: MockTimer,
    }

    fn rig(mut config: Config) -> Rig {
        let _ = simplelog::SimpleLogger::init(
            log::LevelFilter::Debug,
            simplelog::Config::default(),
        );

        config.capture.captures_dir =
            std::env::temp_dir().join(format!("shadow-test-{:x}", rand::random::<u64>()));

        let radio = MockRadio::new();
        let injector = MockInjector::new();
        let timer = MockTimer::new();

        let orch = Orchestrator::new(
            config,
            radio.clone(),
            ReplaySource::from_frames(Vec::new()),
            injector.clone(),
            timer.clone(),
        );

        Rig {
            orch,
            radio,
            injector,
            timer,
        }
    }

    fn scan_config(mode: Mode, auto_start: bool) -> Config {
        let mut config = Config::default();
        config.ap.enabled = false;
        config.autostart.mode = mode;
        config.capture.auto_start = auto_start;
        config.capture.timeout_s = 2;
        config.capture.deauth_interval_ms = 0;
        config
    }

    fn ingest(orch: &TestOrchestrator, frame: Vec<u8>) {
        orch.pipeline.handle(&RawFrame::new(frame));
    }

    fn ap_mac() -> MacAddr {
        MacAddr::parse(AP).unwrap()
    }

    fn client_mac() -> MacAddr {
        MacAddr::parse(CLIENT).unwrap()
    }

    #[tokio::test]
    async fn boot_to_idle_then_scanning() {
        let local = tokio::task::LocalSet::new();
        local
            .run_until(async {
                let rig = rig(scan_config(Mode::Passive, false));

                rig.orch.initialize().await.unwrap();
                assert_eq!(rig.orch.state(), DeviceState::Idle);
                assert_eq!(rig.radio.ops(), vec![RadioOp::EnterMonitor]);

                rig.orch.start_scanning().await.unwrap();
                assert_eq!(rig.orch.state(), DeviceState::Scanning);

                // Idempotent
                rig.orch.start_scanning().await.unwrap();
                assert_eq!(rig.orch.state(), DeviceState::Scanning);
            })
            .await;
    }

    #[tokio::test]
    async fn setup_times_out_into_scanning() {
        let local = tokio::task::LocalSet::new();
        local
            .run_until(async {
                let mut config = scan_config(Mode::Passive, false);
                config.ap.enabled = true;
                config.ap.ssid = "Shadow-Test".to_string();
                let rig = rig(config);

                rig.orch.initialize().await.unwrap();
                assert_eq!(rig.orch.state(), DeviceState::Setup);
                assert_eq!(
                    rig.radio.ops(),
                    vec![RadioOp::EnterAp("Shadow-Test".to_string(), 6)]
                );

                // Before the deadline nothing changes
                rig.timer.set_ms(59_999);
                rig.orch.tick().await.unwrap();
                assert_eq!(rig.orch.state(), DeviceState::Setup);

                rig.timer.set_ms(60_000);
                rig.orch.tick().await.unwrap();
                assert_eq!(rig.orch.state(), DeviceState::Scanning);
                assert!(rig.radio.ops().contains(&RadioOp::EnterMonitor));
            })
            .await;
    }

    #[tokio::test]
    async fn capture_flow_end_to_end() {
        let local = tokio::task::LocalSet::new();
        local
            .run_until(async {
                let rig = rig(scan_config(Mode::Capture, false));
                let mut events = rig.orch.subscribe();

                rig.orch.initialize().await.unwrap();
                rig.orch.start_scanning().await.unwrap();

                ingest(
                    &rig.orch,
                    beacon_frame(ap_mac(), b"HomeNet", 6, -42, BeaconSecurity::RsnSae),
                );

                let aps = rig.orch.aps();
                assert_eq!(aps.len(), 1);
                assert_eq!(aps[0].channel, 6);

                rig.orch.set_target(ap_mac(), "HomeNet").unwrap();
                rig.orch.start_capture().await.unwrap();

                assert_eq!(rig.orch.state(), DeviceState::Capturing);
                // Pinned to the target channel before the engine armed
                assert_eq!(rig.radio.channel(), Some(6));

                ingest(&rig.orch, eapol_frame(ap_mac(), client_mac(), 1, true, false));
                ingest(&rig.orch, eapol_frame(ap_mac(), client_mac(), 2, false, false));

                let handshakes = rig.orch.handshakes();
                assert_eq!(handshakes.len(), 1);
                assert_eq!(handshakes[0].kind, CaptureKind::Handshake);
                assert_eq!(handshakes[0].messages, vec![1, 2]);
                assert!(handshakes[0].is_complete());

                // Duplicate M2 does not re-emit
                ingest(&rig.orch, eapol_frame(ap_mac(), client_mac(), 2, false, false));
                assert_eq!(rig.orch.handshakes().len(), 1);

                // Auto-stop returns to scanning
                rig.orch.tick().await.unwrap();
                assert_eq!(rig.orch.state(), DeviceState::Scanning);

                // Event stream carried the discovery and the handshake
                let mut saw_ap = false;
                let mut saw_handshake = false;
                while let Ok(event) = events.try_recv() {
                    match event {
                        ReconEvent::NewAp(ap) => saw_ap = ap.ssid == "HomeNet",
                        ReconEvent::Handshake(_) => saw_handshake = true,
                        _ => (),
                    }
                }
                assert!(saw_ap);
                assert!(saw_handshake);

                let status = rig.orch.status();
                assert_eq!(status.handshake_count, 1);
                assert_eq!(status.ap_count, 1);
                assert_eq!(status.target_ssid.as_deref(), Some("HomeNet"));
            })
            .await;
    }

    #[tokio::test]
    async fn off_target_eapol_ignored() {
        let local = tokio::task::LocalSet::new();
        local
            .run_until(async {
                let rig = rig(scan_config(Mode::Capture, false));

                rig.orch.initialize().await.unwrap();
                rig.orch.start_scanning().await.unwrap();

                ingest(
                    &rig.orch,
                    beacon_frame(ap_mac(), b"HomeNet", 6, -42, BeaconSecurity::RsnPsk),
                );
                rig.orch.set_target(ap_mac(), "HomeNet").unwrap();
                rig.orch.start_capture().await.unwrap();

                let other = MacAddr::parse("aa:bb:cc:dd:ee:99").unwrap();
                ingest(&rig.orch, eapol_frame(other, client_mac(), 1, true, false));

                let stats = rig.orch.capture_stats().unwrap();
                assert_eq!(stats.eapol_count, 0);
                assert!(stats.handshakes.is_empty());
                assert!(rig.orch.handshakes().is_empty());
            })
            .await;
    }

    #[tokio::test]
    async fn capture_times_out_and_resumes_scanning() {
        let local = tokio::task::LocalSet::new();
        local
            .run_until(async {
                let rig = rig(scan_config(Mode::Capture, false));

                rig.orch.initialize().await.unwrap();
                rig.orch.start_scanning().await.unwrap();

                ingest(
                    &rig.orch,
                    beacon_frame(ap_mac(), b"HomeNet", 6, -42, BeaconSecurity::RsnPsk),
                );
                rig.orch.set_target(ap_mac(), "HomeNet").unwrap();
                rig.orch.start_capture().await.unwrap();
                assert_eq!(rig.orch.state(), DeviceState::Capturing);

                rig.timer.advance_ms(2000);
                rig.orch.tick().await.unwrap();

                assert_eq!(rig.orch.state(), DeviceState::Scanning);
                let stats = rig.orch.capture_stats().unwrap();
                assert_eq!(stats.state, CaptureState::Timeout);
                assert!(stats.handshakes.is_empty());
            })
            .await;
    }

    #[tokio::test]
    async fn auto_start_arms_capture_once() {
        let local = tokio::task::LocalSet::new();
        local
            .run_until(async {
                let rig = rig(scan_config(Mode::Capture, true));

                rig.orch.initialize().await.unwrap();
                rig.orch.start_scanning().await.unwrap();

                ingest(
                    &rig.orch,
                    beacon_frame(ap_mac(), b"HomeNet", 6, -42, BeaconSecurity::RsnPsk),
                );
                rig.orch.set_target(ap_mac(), "HomeNet").unwrap();

                rig.orch.tick().await.unwrap();
                assert_eq!(rig.orch.state(), DeviceState::Capturing);

                // Timeout, then no automatic re-arm for the same target
                rig.timer.advance_ms(2000);
                rig.orch.tick().await.unwrap();
                assert_eq!(rig.orch.state(), DeviceState::Scanning);

                rig.orch.tick().await.unwrap();
                assert_eq!(rig.orch.state(), DeviceState::Scanning);
            })
            .await;
    }

    #[tokio::test]
    async fn start_capture_without_target() {
        let local = tokio::task::LocalSet::new();
        local
            .run_until(async {
                let rig = rig(scan_config(Mode::Capture, false));

                rig.orch.initialize().await.unwrap();
                rig.orch.start_scanning().await.unwrap();

                assert_eq!(rig.orch.start_capture().await, Err(Error::NoTarget));
            })
            .await;
    }

    #[tokio::test]
    async fn passive_mode_ignores_target() {
        let local = tokio::task::LocalSet::new();
        local
            .run_until(async {
                let rig = rig(scan_config(Mode::Passive, false));

                rig.orch.initialize().await.unwrap();
                rig.orch.set_target(ap_mac(), "HomeNet").unwrap();

                assert_eq!(rig.orch.target(), None);
            })
            .await;
    }

    #[tokio::test]
    async fn commands_serialized_with_busy() {
        let local = tokio::task::LocalSet::new();
        local
            .run_until(async {
                let rig = rig(scan_config(Mode::Passive, false));

                let _guard = rig.orch.begin_transition().unwrap();

                assert_eq!(rig.orch.stop_capture().await, Err(Error::Busy));
                assert_eq!(rig.orch.set_mode(Mode::Drop).await, Err(Error::Busy));
            })
            .await;
    }

    #[tokio::test]
    async fn drop_mode_refuses_deauth() {
        let local = tokio::task::LocalSet::new();
        local
            .run_until(async {
                let rig = rig(scan_config(Mode::Drop, false));

                let result = rig.orch.send_deauth(ap_mac(), None).await;
                assert!(matches!(result, Err(Error::InvalidMode(_))));
                assert!(rig.injector.frames().is_empty());
            })
            .await;
    }

    #[tokio::test]
    async fn deauth_burst_attributed_to_session() {
        let local = tokio::task::LocalSet::new();
        local
            .run_until(async {
                let rig = rig(scan_config(Mode::Capture, false));

                rig.orch.initialize().await.unwrap();
                rig.orch.start_scanning().await.unwrap();
                ingest(
                    &rig.orch,
                    beacon_frame(ap_mac(), b"HomeNet", 6, -42, BeaconSecurity::RsnPsk),
                );
                rig.orch.set_target(ap_mac(), "HomeNet").unwrap();
                rig.orch.start_capture().await.unwrap();

                let sent = rig
                    .orch
                    .send_deauth(ap_mac(), Some(client_mac()))
                    .await
                    .unwrap();

                // Bidirectional: one frame each way per iteration
                assert_eq!(sent, 10);
                assert_eq!(rig.injector.frames().len(), 10);
                assert_eq!(rig.orch.capture_stats().unwrap().deauth_sent, 10);
            })
            .await;
    }

    #[tokio::test]
    async fn source_loss_recovers_once_then_fails() {
        let local = tokio::task::LocalSet::new();
        local
            .run_until(async {
                let rig = rig(scan_config(Mode::Passive, false));

                rig.orch.initialize().await.unwrap();
                rig.orch.start_scanning().await.unwrap();

                // First loss: one radio re-init and back to work
                rig.orch.bus.publish(FrameEvent::Lost("ifdown".to_string()));
                for _ in 0..4 {
                    tokio::task::yield_now().await;
                }
                rig.orch.tick().await.unwrap();

                assert_eq!(rig.orch.state(), DeviceState::Scanning);
                assert_eq!(
                    rig.radio
                        .ops()
                        .iter()
                        .filter(|op| **op == RadioOp::EnterMonitor)
                        .count(),
                    2
                );

                // Second loss is fatal
                rig.orch.bus.publish(FrameEvent::Lost("ifdown".to_string()));
                for _ in 0..4 {
                    tokio::task::yield_now().await;
                }
                rig.orch.tick().await.unwrap();

                assert_eq!(rig.orch.state(), DeviceState::Error);
            })
            .await;
    }

    #[tokio::test]
    async fn return_to_setup_restores_ap() {
        let local = tokio::task::LocalSet::new();
        local
            .run_until(async {
                let mut config = scan_config(Mode::Passive, false);
                config.ap.enabled = true;
                config.ap.ssid = "Shadow-Test".to_string();
                let rig = rig(config);

                rig.orch.initialize().await.unwrap();
                rig.orch.start_scanning().await.unwrap();
                assert_eq!(rig.orch.state(), DeviceState::Scanning);

                rig.orch.return_to_setup().await.unwrap();
                assert_eq!(rig.orch.state(), DeviceState::Setup);

                let ops = rig.radio.ops();
                assert!(ops.contains(&RadioOp::EnterManaged));
                assert_eq!(
                    ops.last(),
                    Some(&RadioOp::EnterAp("Shadow-Test".to_string(), 6))
                );
            })
            .await;
    }

    #[tokio::test]
    async fn stop_tears_down() {
        let local = tokio::task::LocalSet::new();
        local
            .run_until(async {
                let rig = rig(scan_config(Mode::Passive, false));

                rig.orch.initialize().await.unwrap();
                rig.orch.start_scanning().await.unwrap();
                rig.orch.stop().await.unwrap();

                assert_eq!(rig.orch.state(), DeviceState::Stopped);
                assert!(rig.radio.ops().contains(&RadioOp::EnterManaged));
                assert!(!rig.orch.hopper.is_running());
            })
            .await;
    }
}
