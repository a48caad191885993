//! Mock radio and injector for tests

use std::cell::RefCell;
use std::collections::HashSet;
use std::rc::Rc;

use super::{ApHandle, InterfaceInfo, InterfaceMode, MonitorHandle, RadioControl};
use crate::error::Error;
use crate::source::Injector;

/// Operations observed by the mock radio
#[derive(Debug, Clone, PartialEq)]
pub enum RadioOp {
    EnterMonitor,
    EnterManaged,
    EnterAp(String, u8),
    SetChannel(u8),
}

#[derive(Default)]
struct Inner {
    ops: Vec<RadioOp>,
    expected: Option<Vec<RadioOp>>,
    fail_channels: HashSet<u8>,
    fail_monitor: bool,
    mode: Option<InterfaceMode>,
    channel: Option<u8>,
}

/// In-memory radio simulator, cloned handles share state
#[derive(Clone, Default)]
pub struct MockRadio {
    inner: Rc<RefCell<Inner>>,
}

impl MockRadio {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record expected operations, validated by `done`
    pub fn expect(&self, ops: &[RadioOp]) {
        let mut inner = self.inner.borrow_mut();
        inner.expected = Some(ops.to_vec());
        inner.ops.clear();
    }

    /// Assert expectations and clear recorded operations
    pub fn done(&self) {
        let mut inner = self.inner.borrow_mut();
        if let Some(expected) = inner.expected.take() {
            assert_eq!(expected, inner.ops, "radio operation mismatch");
        }
        inner.ops.clear();
    }

    /// Recorded operations since the last clear
    pub fn ops(&self) -> Vec<RadioOp> {
        self.inner.borrow().ops.clone()
    }

    /// Script a channel that fails to set
    pub fn fail_channel(&self, channel: u8) {
        self.inner.borrow_mut().fail_channels.insert(channel);
    }

    /// Script monitor entry failure
    pub fn fail_monitor(&self, fail: bool) {
        self.inner.borrow_mut().fail_monitor = fail;
    }

    pub fn mode(&self) -> Option<InterfaceMode> {
        self.inner.borrow().mode
    }

    pub fn channel(&self) -> Option<u8> {
        self.inner.borrow().channel
    }
}

impl RadioControl for MockRadio {
    async fn enter_monitor(&mut self) -> Result<MonitorHandle, Error> {
        let mut inner = self.inner.borrow_mut();
        inner.ops.push(RadioOp::EnterMonitor);

        if inner.fail_monitor {
            return Err(Error::RadioUnavailable("scripted failure".into()));
        }

        inner.mode = Some(InterfaceMode::Monitor);
        Ok(MonitorHandle {
            interface: "wlan0mon".to_string(),
        })
    }

    async fn enter_managed(&mut self) -> Result<(), Error> {
        let mut inner = self.inner.borrow_mut();
        inner.ops.push(RadioOp::EnterManaged);
        inner.mode = Some(InterfaceMode::Managed);
        Ok(())
    }

    async fn enter_ap(
        &mut self,
        ssid: &str,
        _psk: &str,
        channel: u8,
        _hidden: bool,
    ) -> Result<ApHandle, Error> {
        let mut inner = self.inner.borrow_mut();
        inner.ops.push(RadioOp::EnterAp(ssid.to_string(), channel));
        inner.mode = Some(InterfaceMode::Ap);
        inner.channel = Some(channel);

        Ok(ApHandle {
            interface: "wlan0".to_string(),
            ssid: ssid.to_string(),
            channel,
        })
    }

    async fn set_channel(&mut self, channel: u8) -> Result<(), Error> {
        let mut inner = self.inner.borrow_mut();
        inner.ops.push(RadioOp::SetChannel(channel));

        if inner.fail_channels.contains(&channel) {
            return Err(Error::RadioUnavailable(format!(
                "channel {} set failed",
                channel
            )));
        }

        inner.channel = Some(channel);
        Ok(())
    }

    async fn info(&mut self) -> Result<InterfaceInfo, Error> {
        let inner = self.inner.borrow();
        Ok(InterfaceInfo {
            name: "wlan0".to_string(),
            mac: None,
            mode: inner.mode.unwrap_or(InterfaceMode::Managed),
            channel: inner.channel,
        })
    }
}

/// Injector recording frames instead of transmitting them
#[derive(Clone, Default)]
pub struct MockInjector {
    frames: Rc<RefCell<Vec<Vec<u8>>>>,
}

impl MockInjector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn frames(&self) -> Vec<Vec<u8>> {
        self.frames.borrow().clone()
    }
}

impl Injector for MockInjector {
    fn attach(&mut self, _interface: &str) {}

    fn inject(&mut self, frame: &[u8]) -> Result<(), Error> {
        self.frames.borrow_mut().push(frame.to_vec());
        Ok(())
    }
}
