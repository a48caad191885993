

pub use crate::error::Error;
pub use crate::timer::{SystemTimer, Timer};

pub use crate::config::{ApConfig, CaptureConfig, Config, Mode, ScanConfig, TargetsConfig};

pub use crate::frame::MacAddr;
pub use crate::frame::ie::Security;

pub use crate::radio::iw::IwRadio;
pub use crate::radio::{ApHandle, InterfaceInfo, InterfaceMode, MonitorHandle, RadioControl};

pub use crate::source::{
    FrameBus, FrameEvent, FrameSource, Injector, LiveSource, MonitorInjector, RawFrame,
    ReplaySource,
};

pub use crate::classify::{Classifier, Event};
pub use crate::store::{AccessPoint, ObservationStore, ProbeRecord, Station};

pub use crate::capture::{CaptureEngine, CaptureKind, CaptureState, CaptureStats, Handshake};
pub use crate::deauth::{DeauthEmitter, DeauthStats};
pub use crate::hopper::ChannelHopper;

pub use crate::device::{DeviceState, Orchestrator, ReconEvent, Status};
