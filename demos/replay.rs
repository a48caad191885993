//! Offline capture analysis demo
//
// https://github.com/rust-iot/rust-shadow
// Copyright 2024 Ryan Kurte

use std::path::PathBuf;

use log::info;

use structopt::StructOpt;

use shadow::pcap;
use shadow::prelude::*;

#[derive(Debug, StructOpt)]
struct Options {
    /// Capture file to replay
    pub pcap: PathBuf,

    #[structopt(long, default_value = "info")]
    /// Configure log level
    pub log_level: simplelog::LevelFilter,
}

fn main() -> anyhow::Result<()> {
    let opts = Options::from_args();

    let _ = simplelog::SimpleLogger::init(opts.log_level, simplelog::Config::default());

    let mut reader = pcap::Reader::open(&opts.pcap)?;
    info!(
        "Replaying {} (link type {})",
        opts.pcap.display(),
        reader.link_type()
    );

    let mut classifier = Classifier::new();
    let mut store = ObservationStore::new(SystemTimer::new(), 10_000);
    let mut eapol = 0u64;

    while let Some(frame) = reader.next_frame()? {
        match classifier.classify(&RawFrame::new(frame)) {
            Event::Beacon(beacon) => {
                store.upsert_ap(&beacon);
            }
            Event::Probe(probe) => {
                store.record_probe(&probe);
            }
            Event::Data(data) => {
                store.record_data(&data);
            }
            Event::Eapol(_) => eapol += 1,
            Event::Ignore => (),
        }
    }

    let stats = classifier.stats();
    let (aps, stations, probes) = store.counts();

    println!(
        "{} frames ({} malformed), {} aps, {} stations, {} probes, {} eapol",
        stats.frames, stats.malformed, aps, stations, probes, eapol
    );

    println!("\n{:<20} {:<18} {:>3} {:>5}  {:<8} STA", "SSID", "BSSID", "CH", "dBm", "SEC");
    for ap in store.aps() {
        println!(
            "{:<20} {:<18} {:>3} {:>5}  {:<8} {}",
            ap.ssid,
            ap.bssid.to_string(),
            ap.channel,
            ap.signal_dbm,
            ap.security.to_string(),
            ap.stations.len(),
        );
    }

    Ok(())
}
