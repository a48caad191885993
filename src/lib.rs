//! A pocket 802.11 reconnaissance stack: radio mode control, channel
//! hopping, frame classification, EAPOL handshake capture and the
//! orchestration binding them together.
//
// https://github.com/rust-iot/rust-shadow
// Copyright 2024 Ryan Kurte

pub mod timer;

pub mod error;

pub mod config;

pub mod frame;

pub mod pcap;

pub mod radio;

pub mod source;

pub mod classify;

pub mod store;

pub mod capture;

pub mod hopper;

pub mod deauth;

pub mod device;

pub mod prelude;

#[cfg(any(test, feature = "mocks"))]
pub mod testkit;

pub use crate::error::Error;
