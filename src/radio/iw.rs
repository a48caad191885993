//! Production radio controller driving `ip`/`iw` and friends
//
// https://github.com/rust-iot/rust-shadow
// Copyright 2024 Ryan Kurte

use std::path::Path;
use std::time::Duration;

use log::{debug, info, warn};
use rand::Rng;
use tokio::process::Command;
use tokio::time::timeout;

use super::{ApHandle, InterfaceInfo, InterfaceMode, MonitorHandle, RadioControl};
use crate::error::Error;
use crate::frame::MacAddr;

/// Channel set deadline
const SET_CHANNEL_TIMEOUT: Duration = Duration::from_millis(100);

/// Services that hold the interface in managed mode
const CONFLICTING_SERVICES: &[&str] = &["wpa_supplicant", "hostapd", "dnsmasq", "NetworkManager"];

/// Ordered monitor-mode entry strategies. Each is attempted in turn until
/// one yields a verified monitor interface.
#[derive(Debug, Clone, Copy, PartialEq)]
enum MonitorStrategy {
    /// airmon-ng, which may create a derived `<iface>mon` interface
    Airmon,
    /// Direct `iw` type switch
    Iw,
    /// Nexmon firmware switch via nexutil
    Nexutil,
}

impl MonitorStrategy {
    const CHAIN: [MonitorStrategy; 3] = [
        MonitorStrategy::Airmon,
        MonitorStrategy::Iw,
        MonitorStrategy::Nexutil,
    ];

    async fn attempt(&self, interface: &str) -> Result<MonitorHandle, Error> {
        match self {
            MonitorStrategy::Airmon => {
                run_ok("airmon-ng", &["check", "kill"]).await;

                let output = run_capture("airmon-ng", &["start", interface]).await?;
                let output = output.to_lowercase();

                if !output.contains("monitor mode") && !output.contains("enabled") {
                    return Err(Error::RadioUnavailable("airmon-ng reported no change".into()));
                }

                // airmon-ng may rename the interface
                for suffix in ["mon", "0mon", ""] {
                    let name = format!("{}{}", interface, suffix);
                    if interface_exists(&name) && verify_monitor(&name).await {
                        return Ok(MonitorHandle { interface: name });
                    }
                }

                Err(Error::RadioUnavailable("no airmon interface found".into()))
            }
            MonitorStrategy::Iw => {
                run_ok("ip", &["link", "set", interface, "down"]).await;

                if !run_ok("iw", &["dev", interface, "set", "type", "monitor"]).await {
                    return Err(Error::RadioUnavailable("iw type switch failed".into()));
                }

                run_ok("ip", &["link", "set", interface, "up"]).await;

                if verify_monitor(interface).await {
                    Ok(MonitorHandle {
                        interface: interface.to_string(),
                    })
                } else {
                    Err(Error::RadioUnavailable("monitor mode not verified".into()))
                }
            }
            MonitorStrategy::Nexutil => {
                run_ok("ip", &["link", "set", interface, "down"]).await;

                if !run_ok("nexutil", &["-m2"]).await {
                    return Err(Error::RadioUnavailable("nexutil switch failed".into()));
                }

                run_ok("iw", &["dev", interface, "set", "type", "monitor"]).await;
                run_ok("ip", &["link", "set", interface, "up"]).await;

                if verify_monitor(interface).await {
                    Ok(MonitorHandle {
                        interface: interface.to_string(),
                    })
                } else {
                    Err(Error::RadioUnavailable("monitor mode not verified".into()))
                }
            }
        }
    }
}

/// Radio controller shelling out to the OS link-layer tooling
pub struct IwRadio {
    interface: String,
    monitor: Option<String>,
    original_mac: Option<MacAddr>,
}

impl IwRadio {
    pub fn new(interface: impl Into<String>) -> Self {
        Self {
            interface: interface.into(),
            monitor: None,
            original_mac: None,
        }
    }

    /// Interface currently used for capture and tuning
    fn active_interface(&self) -> &str {
        self.monitor.as_deref().unwrap_or(&self.interface)
    }

    /// List WiFi interfaces known to the kernel
    pub async fn list_interfaces() -> Result<Vec<String>, Error> {
        let output = run_capture("iw", &["dev"]).await?;

        Ok(output
            .lines()
            .filter_map(|line| {
                let line = line.trim();
                line.strip_prefix("Interface ").map(str::to_string)
            })
            .collect())
    }

    /// Check for a nexmon-patched firmware via nexutil
    pub async fn check_nexutil(&self) -> bool {
        match run_capture("nexutil", &["-v"]).await {
            Ok(output) => output.to_lowercase().contains("nexmon") || !output.is_empty(),
            Err(_) => false,
        }
    }

    /// Set the interface MAC address
    pub async fn set_mac(&mut self, mac: MacAddr) -> Result<(), Error> {
        if self.original_mac.is_none() {
            self.original_mac = self.query_info().await.ok().and_then(|i| i.mac);
        }

        run_ok("ip", &["link", "set", &self.interface, "down"]).await;

        let ok = run_ok(
            "ip",
            &["link", "set", &self.interface, "address", &mac.to_string()],
        )
        .await;

        run_ok("ip", &["link", "set", &self.interface, "up"]).await;

        if ok {
            info!("{} MAC set to {}", self.interface, mac);
            Ok(())
        } else {
            Err(Error::RadioUnavailable("MAC set failed".into()))
        }
    }

    /// Set a random locally-administered MAC address
    pub async fn randomize_mac(&mut self) -> Result<MacAddr, Error> {
        let mut bytes: [u8; 6] = rand::thread_rng().gen();
        // Locally administered, unicast
        bytes[0] = (bytes[0] | 0x02) & !0x01;

        let mac = MacAddr(bytes);
        self.set_mac(mac).await?;
        Ok(mac)
    }

    /// Restore the MAC address seen before the first `set_mac`
    pub async fn restore_mac(&mut self) -> Result<(), Error> {
        match self.original_mac {
            Some(mac) => self.set_mac(mac).await,
            None => Ok(()),
        }
    }

    async fn query_info(&self) -> Result<InterfaceInfo, Error> {
        let name = self.active_interface().to_string();
        let output = run_capture("iw", &["dev", &name, "info"]).await?;

        let mut mode = InterfaceMode::Managed;
        let mut channel = None;
        let mut mac = None;

        for line in output.lines() {
            let line = line.trim();

            if let Some(rest) = line.strip_prefix("type ") {
                mode = match rest.trim() {
                    "monitor" => InterfaceMode::Monitor,
                    "AP" => InterfaceMode::Ap,
                    _ => InterfaceMode::Managed,
                };
            } else if let Some(rest) = line.strip_prefix("channel ") {
                channel = rest.split_whitespace().next().and_then(|c| c.parse().ok());
            } else if let Some(rest) = line.strip_prefix("addr ") {
                mac = MacAddr::parse(rest.trim());
            }
        }

        Ok(InterfaceInfo {
            name,
            mac,
            mode,
            channel,
        })
    }
}

impl RadioControl for IwRadio {
    async fn enter_monitor(&mut self) -> Result<MonitorHandle, Error> {
        info!("Switching {} to monitor mode", self.interface);

        stop_conflicting_services().await;

        let mut last = Error::RadioUnavailable("no strategies attempted".into());

        for strategy in MonitorStrategy::CHAIN {
            match strategy.attempt(&self.interface).await {
                Ok(handle) => {
                    info!("Monitor mode enabled on {} ({:?})", handle.interface, strategy);
                    self.monitor = Some(handle.interface.clone());
                    return Ok(handle);
                }
                Err(e) => {
                    debug!("Monitor strategy {:?} failed: {}", strategy, e);
                    last = e;
                }
            }
        }

        Err(last)
    }

    async fn enter_managed(&mut self) -> Result<(), Error> {
        info!("Switching {} to managed mode", self.interface);

        // Tear down a derived airmon interface first
        if let Some(mon) = self.monitor.take() {
            if mon != self.interface {
                run_ok("airmon-ng", &["stop", &mon]).await;
            }
        }

        run_ok("ip", &["link", "set", &self.interface, "down"]).await;

        if !run_ok("iw", &["dev", &self.interface, "set", "type", "managed"]).await {
            warn!("Managed type switch failed on {}", self.interface);
        }

        run_ok("ip", &["link", "set", &self.interface, "up"]).await;

        // Failure to restart the supplicant is reported but does not block
        // the next mode switch
        if !run_ok("systemctl", &["start", "wpa_supplicant"]).await {
            warn!("Failed to restart wpa_supplicant");
        }

        Ok(())
    }

    async fn enter_ap(
        &mut self,
        ssid: &str,
        _psk: &str,
        channel: u8,
        _hidden: bool,
    ) -> Result<ApHandle, Error> {
        info!("Switching {} to AP mode for {}", self.interface, ssid);

        self.monitor = None;

        run_ok("ip", &["link", "set", &self.interface, "down"]).await;

        if !run_ok("iw", &["dev", &self.interface, "set", "type", "__ap"]).await {
            return Err(Error::RadioUnavailable("AP type switch failed".into()));
        }

        run_ok("ip", &["link", "set", &self.interface, "up"]).await;

        // AP daemon supervision is the soft-AP collaborator's concern; the
        // handoff contract only requires the mode and channel
        self.set_channel(channel).await?;

        Ok(ApHandle {
            interface: self.interface.clone(),
            ssid: ssid.to_string(),
            channel,
        })
    }

    async fn set_channel(&mut self, channel: u8) -> Result<(), Error> {
        let iface = self.active_interface().to_string();
        let channel_str = channel.to_string();

        let result = timeout(
            SET_CHANNEL_TIMEOUT,
            run_ok("iw", &["dev", &iface, "set", "channel", &channel_str]),
        )
        .await;

        match result {
            Ok(true) => {
                debug!("{} set to channel {}", iface, channel);
                Ok(())
            }
            Ok(false) => Err(Error::RadioUnavailable(format!(
                "channel {} set failed",
                channel
            ))),
            Err(_) => Err(Error::RadioUnavailable(format!(
                "channel {} set timed out",
                channel
            ))),
        }
    }

    async fn info(&mut self) -> Result<InterfaceInfo, Error> {
        self.query_info().await
    }
}

/// Run a command, discarding output; false on spawn failure or non-zero
/// exit
async fn run_ok(cmd: &str, args: &[&str]) -> bool {
    match Command::new(cmd).args(args).output().await {
        Ok(output) => {
            if !output.status.success() {
                debug!(
                    "Command failed: {} {}: {}",
                    cmd,
                    args.join(" "),
                    String::from_utf8_lossy(&output.stderr).trim()
                );
            }
            output.status.success()
        }
        Err(e) => {
            debug!("Command error: {} {}: {}", cmd, args.join(" "), e);
            false
        }
    }
}

/// Run a command, capturing combined output
async fn run_capture(cmd: &str, args: &[&str]) -> Result<String, Error> {
    let output = Command::new(cmd)
        .args(args)
        .output()
        .await
        .map_err(|e| Error::RadioUnavailable(format!("{}: {}", cmd, e)))?;

    let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
    text.push_str(&String::from_utf8_lossy(&output.stderr));

    Ok(text)
}

fn interface_exists(name: &str) -> bool {
    Path::new("/sys/class/net").join(name).exists()
}

/// Confirm the interface reports monitor type
async fn verify_monitor(name: &str) -> bool {
    match run_capture("iw", &["dev", name, "info"]).await {
        Ok(output) => output.contains("type monitor"),
        Err(_) => false,
    }
}

async fn stop_conflicting_services() {
    for service in CONFLICTING_SERVICES {
        run_ok("systemctl", &["stop", service]).await;
        run_ok("killall", &[service]).await;
    }
}
