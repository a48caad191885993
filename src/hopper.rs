//! Cooperative channel hopping
//
// https://github.com/rust-iot/rust-shadow
// Copyright 2024 Ryan Kurte

use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;

use log::{debug, info, warn};
use rand::seq::SliceRandom;
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::error::Error;
use crate::radio::RadioControl;

struct PinState {
    channel: u8,
    expires_at: Option<Instant>,
}

struct State {
    order: Vec<u8>,
    index: usize,
    randomize: bool,
    running: bool,
    current: Option<u8>,
    hops: u64,
    pin: Option<PinState>,
}

/// Channel hopper cycling the radio over a fixed set.
///
/// Hopping runs as a cooperative task; `pin` pauses the cycle on one
/// channel and `resume` re-enters the sequence at the entry after the
/// pre-pin one.
pub struct ChannelHopper<R> {
    radio: Rc<Mutex<R>>,
    state: Rc<RefCell<State>>,
    interval: Duration,
}

impl<R> Clone for ChannelHopper<R> {
    fn clone(&self) -> Self {
        Self {
            radio: self.radio.clone(),
            state: self.state.clone(),
            interval: self.interval,
        }
    }
}

impl<R: RadioControl + 'static> ChannelHopper<R> {
    pub fn new(radio: Rc<Mutex<R>>, channels: Vec<u8>, interval_ms: u64, randomize: bool) -> Self {
        Self {
            radio,
            state: Rc::new(RefCell::new(State {
                order: if channels.is_empty() {
                    vec![1, 6, 11]
                } else {
                    channels
                },
                index: 0,
                randomize,
                running: false,
                current: None,
                hops: 0,
                pin: None,
            })),
            interval: Duration::from_millis(interval_ms.max(1)),
        }
    }

    /// Start the hop task; a no-op if already running
    pub fn start(&self) {
        {
            let mut state = self.state.borrow_mut();
            if state.running {
                return;
            }
            state.running = true;
            info!("Starting channel hopper: {:?}", state.order);
        }

        let hopper = self.clone();
        tokio::task::spawn_local(async move {
            hopper.run().await;
            debug!("Channel hopper task exited");
        });
    }

    /// Stop hopping; the task drains its in-flight channel set and exits
    pub fn stop(&self) {
        self.state.borrow_mut().running = false;
    }

    pub fn is_running(&self) -> bool {
        self.state.borrow().running
    }

    /// Channel the radio was last successfully tuned to
    pub fn current(&self) -> Option<u8> {
        self.state.borrow().current
    }

    /// Completed hop count
    pub fn hops(&self) -> u64 {
        self.state.borrow().hops
    }

    /// Pause hopping on a fixed channel. The radio acknowledges the tune
    /// before this returns, so dependent work never races the pin.
    pub async fn pin(&self, channel: u8, duration: Option<Duration>) -> Result<(), Error> {
        self.radio.lock().await.set_channel(channel).await?;

        let mut state = self.state.borrow_mut();
        state.pin = Some(PinState {
            channel,
            expires_at: duration.map(|d| Instant::now() + d),
        });
        state.current = Some(channel);

        debug!("Pinned to channel {}", channel);

        Ok(())
    }

    /// Return to the hop sequence; the next hop lands on the entry after
    /// the pre-pin one
    pub fn resume(&self) {
        let mut state = self.state.borrow_mut();
        if state.pin.take().is_some() {
            debug!("Resuming hop sequence");
        }
    }

    async fn run(&self) {
        loop {
            let (running, pinned, expires_at) = {
                let state = self.state.borrow();
                (
                    state.running,
                    state.pin.is_some(),
                    state.pin.as_ref().and_then(|p| p.expires_at),
                )
            };

            if !running {
                return;
            }

            if pinned {
                if let Some(at) = expires_at {
                    if Instant::now() >= at {
                        self.resume();
                        continue;
                    }
                }
                tokio::time::sleep(self.interval).await;
                continue;
            }

            self.hop_once().await;
            tokio::time::sleep(self.interval).await;
        }
    }

    /// Tune to the next channel in the sequence. A failed set is logged
    /// and skipped, never retried.
    async fn hop_once(&self) {
        let channel = {
            let mut state = self.state.borrow_mut();

            let channel = state.order[state.index];
            state.index += 1;

            if state.index >= state.order.len() {
                state.index = 0;
                if state.randomize {
                    let mut order = state.order.clone();
                    order.shuffle(&mut rand::thread_rng());
                    state.order = order;
                }
            }

            channel
        };

        match self.radio.lock().await.set_channel(channel).await {
            Ok(()) => {
                let mut state = self.state.borrow_mut();
                state.current = Some(channel);
                state.hops += 1;
            }
            Err(e) => {
                warn!("Failed to set channel {}: {}", channel, e);
            }
        }
    }
}
