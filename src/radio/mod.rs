//! Radio mode control
//
// https://github.com/rust-iot/rust-shadow
// Copyright 2024 Ryan Kurte

use crate::error::Error;
use crate::frame::MacAddr;

pub mod iw;

#[cfg(any(test, feature = "mocks"))]
pub mod mock;

/// Interface operation mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display, strum::EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum InterfaceMode {
    Managed,
    Monitor,
    Ap,
}

/// Interface information
#[derive(Debug, Clone, PartialEq)]
pub struct InterfaceInfo {
    pub name: String,
    pub mac: Option<MacAddr>,
    pub mode: InterfaceMode,
    pub channel: Option<u8>,
}

/// Opaque handle carrying the effective monitor interface name, which may
/// differ from the base interface
#[derive(Debug, Clone, PartialEq)]
pub struct MonitorHandle {
    pub interface: String,
}

/// Handle for an interface in AP mode
#[derive(Debug, Clone, PartialEq)]
pub struct ApHandle {
    pub interface: String,
    pub ssid: String,
    pub channel: u8,
}

/// Sole gateway to the physical radio. All mode and channel changes go
/// through one implementation of this trait.
#[allow(async_fn_in_trait)]
pub trait RadioControl {
    /// Switch to monitor mode, returning the effective capture interface
    async fn enter_monitor(&mut self) -> Result<MonitorHandle, Error>;

    /// Restore managed mode
    async fn enter_managed(&mut self) -> Result<(), Error>;

    /// Switch to AP mode for the setup handoff
    async fn enter_ap(
        &mut self,
        ssid: &str,
        psk: &str,
        channel: u8,
        hidden: bool,
    ) -> Result<ApHandle, Error>;

    /// Tune to a channel, completing within 100ms
    async fn set_channel(&mut self, channel: u8) -> Result<(), Error>;

    /// Query current interface state
    async fn info(&mut self) -> Result<InterfaceInfo, Error>;
}
