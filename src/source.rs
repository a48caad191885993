//! Monitor-interface frame plumbing
//
// https://github.com/rust-iot/rust-shadow
// Copyright 2024 Ryan Kurte

use std::ffi::CString;
use std::io;
use std::mem;
use std::os::unix::io::RawFd;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use bytes::Bytes;
use log::{debug, error, info, warn};
use tokio::sync::broadcast;

use crate::error::Error;
use crate::pcap;
use crate::radio::MonitorHandle;

/// Default frame channel depth
pub const DEFAULT_QUEUE_DEPTH: usize = 1024;

const RECV_BUFFER_LEN: usize = 4096;

/// One captured frame: radiotap header plus 802.11 payload
#[derive(Debug, Clone, PartialEq)]
pub struct RawFrame {
    pub bytes: Bytes,
}

impl RawFrame {
    pub fn new(bytes: impl Into<Bytes>) -> Self {
        Self {
            bytes: bytes.into(),
        }
    }
}

/// Item on the frame bus
#[derive(Debug, Clone, PartialEq)]
pub enum FrameEvent {
    Frame(RawFrame),
    /// Error terminator, the source will produce nothing further
    Lost(String),
}

/// Bounded channel between the capture thread and the event loop.
///
/// On overflow the oldest frame is dropped in favour of fresh ones;
/// receivers observe the gap and count it.
#[derive(Clone)]
pub struct FrameBus {
    tx: broadcast::Sender<FrameEvent>,
}

impl FrameBus {
    pub fn new(depth: usize) -> Self {
        let (tx, _) = broadcast::channel(depth.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<FrameEvent> {
        self.tx.subscribe()
    }

    pub fn publish(&self, event: FrameEvent) {
        // No receivers yet is fine, frames before attach are uninteresting
        let _ = self.tx.send(event);
    }
}

impl Default for FrameBus {
    fn default() -> Self {
        Self::new(DEFAULT_QUEUE_DEPTH)
    }
}

/// Produces frames onto the bus
pub trait FrameSource {
    /// Begin producing frames from the given monitor interface
    fn start(&mut self, monitor: &MonitorHandle, bus: FrameBus) -> Result<(), Error>;

    /// Stop producing and release the interface
    fn stop(&mut self);
}

/// Injects raw frames on the monitor interface
pub trait Injector {
    /// Point the injector at a (new) monitor interface
    fn attach(&mut self, interface: &str);

    /// Transmit one frame, radiotap header included
    fn inject(&mut self, frame: &[u8]) -> Result<(), Error>;
}

/// Raw AF_PACKET socket bound to one interface.
///
/// Delivers complete radiotap-prefixed frames in monitor mode and accepts
/// raw frames for injection. Receive blocks for at most 500ms so the
/// owning thread can observe shutdown.
pub struct RawSocket {
    fd: RawFd,
}

impl RawSocket {
    pub fn open(interface: &str) -> io::Result<Self> {
        let protocol = (libc::ETH_P_ALL as u16).to_be();

        let fd = unsafe { libc::socket(libc::AF_PACKET, libc::SOCK_RAW, protocol as i32) };
        if fd < 0 {
            return Err(io::Error::last_os_error());
        }

        let socket = Self { fd };

        let name = CString::new(interface)
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "bad interface name"))?;
        let index = unsafe { libc::if_nametoindex(name.as_ptr()) };
        if index == 0 {
            return Err(io::Error::last_os_error());
        }

        let mut addr: libc::sockaddr_ll = unsafe { mem::zeroed() };
        addr.sll_family = libc::AF_PACKET as u16;
        addr.sll_protocol = protocol;
        addr.sll_ifindex = index as i32;

        let ret = unsafe {
            libc::bind(
                fd,
                &addr as *const libc::sockaddr_ll as *const libc::sockaddr,
                mem::size_of::<libc::sockaddr_ll>() as libc::socklen_t,
            )
        };
        if ret < 0 {
            return Err(io::Error::last_os_error());
        }

        let tv = libc::timeval {
            tv_sec: 0,
            tv_usec: 500_000,
        };
        let ret = unsafe {
            libc::setsockopt(
                fd,
                libc::SOL_SOCKET,
                libc::SO_RCVTIMEO,
                &tv as *const libc::timeval as *const libc::c_void,
                mem::size_of::<libc::timeval>() as libc::socklen_t,
            )
        };
        if ret < 0 {
            return Err(io::Error::last_os_error());
        }

        Ok(socket)
    }

    pub fn recv(&self, buf: &mut [u8]) -> io::Result<usize> {
        let n = unsafe { libc::recv(self.fd, buf.as_mut_ptr() as *mut libc::c_void, buf.len(), 0) };
        if n < 0 {
            Err(io::Error::last_os_error())
        } else {
            Ok(n as usize)
        }
    }

    pub fn send(&self, buf: &[u8]) -> io::Result<usize> {
        let n = unsafe { libc::send(self.fd, buf.as_ptr() as *const libc::c_void, buf.len(), 0) };
        if n < 0 {
            Err(io::Error::last_os_error())
        } else {
            Ok(n as usize)
        }
    }
}

impl Drop for RawSocket {
    fn drop(&mut self) {
        unsafe {
            libc::close(self.fd);
        }
    }
}

/// Live source reading the monitor interface on a dedicated thread.
///
/// The thread's only job is to block on the socket and post frames to the
/// bus; everything downstream runs on the event loop.
pub struct LiveSource {
    running: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl LiveSource {
    pub fn new() -> Self {
        Self {
            running: Arc::new(AtomicBool::new(false)),
            thread: None,
        }
    }
}

impl Default for LiveSource {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameSource for LiveSource {
    fn start(&mut self, monitor: &MonitorHandle, bus: FrameBus) -> Result<(), Error> {
        self.stop();

        let socket = RawSocket::open(&monitor.interface)
            .map_err(|e| Error::FrameSourceLost(format!("{}: {}", monitor.interface, e)))?;

        info!("Capture started on {}", monitor.interface);

        self.running.store(true, Ordering::SeqCst);
        let running = self.running.clone();

        self.thread = Some(std::thread::spawn(move || {
            let mut buf = [0u8; RECV_BUFFER_LEN];

            while running.load(Ordering::SeqCst) {
                match socket.recv(&mut buf) {
                    Ok(0) => (),
                    Ok(n) => {
                        bus.publish(FrameEvent::Frame(RawFrame::new(Bytes::copy_from_slice(
                            &buf[..n],
                        ))));
                    }
                    Err(e)
                        if e.kind() == io::ErrorKind::WouldBlock
                            || e.kind() == io::ErrorKind::TimedOut =>
                    {
                        // Receive timeout, re-check the running flag
                    }
                    Err(e) => {
                        if running.load(Ordering::SeqCst) {
                            error!("Capture read failed: {}", e);
                            bus.publish(FrameEvent::Lost(e.to_string()));
                        }
                        break;
                    }
                }
            }

            debug!("Capture thread exited");
        }));

        Ok(())
    }

    fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);

        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl Drop for LiveSource {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Replays canned frames onto the bus, for tests and offline analysis
pub struct ReplaySource {
    frames: Vec<Bytes>,
}

impl ReplaySource {
    pub fn from_frames(frames: Vec<Bytes>) -> Self {
        Self { frames }
    }

    /// Load every frame of a capture file
    pub fn from_pcap(path: &std::path::Path) -> Result<Self, Error> {
        let mut reader = pcap::Reader::open(path)?;
        let mut frames = Vec::new();

        while let Some(frame) = reader.next_frame()? {
            frames.push(Bytes::from(frame));
        }

        Ok(Self { frames })
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }
}

impl FrameSource for ReplaySource {
    fn start(&mut self, _monitor: &MonitorHandle, bus: FrameBus) -> Result<(), Error> {
        for frame in &self.frames {
            bus.publish(FrameEvent::Frame(RawFrame::new(frame.clone())));
        }
        Ok(())
    }

    fn stop(&mut self) {}
}

/// Production injector opening a raw socket lazily on the attached
/// monitor interface
pub struct MonitorInjector {
    interface: Option<String>,
    socket: Option<RawSocket>,
}

impl MonitorInjector {
    pub fn new() -> Self {
        Self {
            interface: None,
            socket: None,
        }
    }
}

impl Default for MonitorInjector {
    fn default() -> Self {
        Self::new()
    }
}

impl Injector for MonitorInjector {
    fn attach(&mut self, interface: &str) {
        if self.interface.as_deref() != Some(interface) {
            self.interface = Some(interface.to_string());
            self.socket = None;
        }
    }

    fn inject(&mut self, frame: &[u8]) -> Result<(), Error> {
        if self.socket.is_none() {
            let interface = self
                .interface
                .as_deref()
                .ok_or_else(|| Error::RadioUnavailable("no monitor interface attached".into()))?;

            self.socket = Some(RawSocket::open(interface).map_err(|e| {
                warn!("Injection socket open failed: {}", e);
                Error::Io(e.to_string())
            })?);
        }

        match self.socket.as_ref().unwrap().send(frame) {
            Ok(_) => Ok(()),
            Err(e) => {
                // Drop the socket so the next attempt reopens it
                self.socket = None;
                Err(Error::Io(e.to_string()))
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[tokio::test]
    async fn bus_delivers_in_order() {
        let bus = FrameBus::new(16);
        let mut rx = bus.subscribe();

        bus.publish(FrameEvent::Frame(RawFrame::new(vec![1u8])));
        bus.publish(FrameEvent::Frame(RawFrame::new(vec![2u8])));

        assert_eq!(
            rx.recv().await.unwrap(),
            FrameEvent::Frame(RawFrame::new(vec![1u8]))
        );
        assert_eq!(
            rx.recv().await.unwrap(),
            FrameEvent::Frame(RawFrame::new(vec![2u8]))
        );
    }

    #[tokio::test]
    async fn bus_overflow_drops_oldest() {
        let bus = FrameBus::new(2);
        let mut rx = bus.subscribe();

        for i in 0..5u8 {
            bus.publish(FrameEvent::Frame(RawFrame::new(vec![i])));
        }

        // The gap is reported before the surviving (freshest) frames
        match rx.recv().await {
            Err(broadcast::error::RecvError::Lagged(n)) => assert_eq!(n, 3),
            other => panic!("expected lag, got {:?}", other),
        }

        assert_eq!(
            rx.recv().await.unwrap(),
            FrameEvent::Frame(RawFrame::new(vec![3u8]))
        );
        assert_eq!(
            rx.recv().await.unwrap(),
            FrameEvent::Frame(RawFrame::new(vec![4u8]))
        );
    }

    #[tokio::test]
    async fn replay_publishes_all() {
        let mut source = ReplaySource::from_frames(vec![Bytes::from_static(&[1]), Bytes::from_static(&[2])]);
        let bus = FrameBus::new(16);
        let mut rx = bus.subscribe();

        let monitor = MonitorHandle {
            interface: "test0".to_string(),
        };
        source.start(&monitor, bus).unwrap();

        assert!(matches!(rx.recv().await.unwrap(), FrameEvent::Frame(_)));
        assert!(matches!(rx.recv().await.unwrap(), FrameEvent::Frame(_)));
    }
}
