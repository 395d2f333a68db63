//! Layout of the 100-element per-packet feature vector produced by the
//! downstream extractor from a rebuilt sequence.
//!
//! | indices | block |
//! |---------|-------|
//! | 0–59    | packet size, 4 channels × 5 windows × (weight, mean, std) |
//! | 60–74   | global inter-arrival time, 5 windows × (weight, mean, std) |
//! | 75–99   | correlation coefficients, 5 channel pairs × 5 windows |
//!
//! Inside a 15-element block the index is `window * 3 + stat`; inside the
//! correlation block it is `pair * 5 + window`.

use anyhow::{Context, Result};
use csv::ReaderBuilder;
use std::fs::File;
use std::io::{BufReader, Read};
use tracing::info;

use crate::error::FeatureError;

pub const FEATURE_DIM: usize = 100;
pub const WINDOWS: usize = 5;
pub const STATS_PER_WINDOW: usize = 3;
pub const CORRELATION_PAIRS: usize = 5;

const BLOCK_LEN: usize = WINDOWS * STATS_PER_WINDOW;
const JITTER_OFFSET: usize = 60;
const CORRELATION_OFFSET: usize = 75;

/// Aggregation key of a packet-size statistics block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SizeChannel {
    SrcMacIp = 0,
    SrcIp = 1,
    SrcDstIp = 2,
    SrcIpDstPort = 3,
}

impl SizeChannel {
    pub const ALL: [SizeChannel; 4] = [
        SizeChannel::SrcMacIp,
        SizeChannel::SrcIp,
        SizeChannel::SrcDstIp,
        SizeChannel::SrcIpDstPort,
    ];

    fn offset(self) -> usize {
        self as usize * BLOCK_LEN
    }
}

/// Damped statistics of one time-decay window.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WindowStats {
    pub weight: f64,
    pub mean: f64,
    pub std: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FeatureVector {
    values: Vec<f64>,
}

impl FeatureVector {
    pub fn new(values: Vec<f64>) -> Result<Self, FeatureError> {
        if values.len() != FEATURE_DIM {
            return Err(FeatureError::InvalidDimension {
                expected: FEATURE_DIM,
                got: values.len(),
            });
        }
        Ok(Self { values })
    }

    pub fn as_slice(&self) -> &[f64] {
        &self.values
    }

    /// The 15 raw values for one packet-size channel.
    pub fn size_block(&self, channel: SizeChannel) -> &[f64] {
        &self.values[channel.offset()..channel.offset() + BLOCK_LEN]
    }

    pub fn packet_size(&self, channel: SizeChannel, window: usize) -> Option<WindowStats> {
        window_stats(self.size_block(channel), window)
    }

    pub fn jitter(&self, window: usize) -> Option<WindowStats> {
        window_stats(&self.values[JITTER_OFFSET..JITTER_OFFSET + BLOCK_LEN], window)
    }

    pub fn correlation(&self, pair: usize, window: usize) -> Option<f64> {
        if pair >= CORRELATION_PAIRS || window >= WINDOWS {
            return None;
        }
        Some(self.values[CORRELATION_OFFSET + pair * WINDOWS + window])
    }
}

fn window_stats(block: &[f64], window: usize) -> Option<WindowStats> {
    let base = window.checked_mul(STATS_PER_WINDOW)?;
    match block.get(base..base.checked_add(STATS_PER_WINDOW)?)? {
        &[weight, mean, std] => Some(WindowStats { weight, mean, std }),
        _ => None,
    }
}

/// Checks every row of a feature matrix against the layout.
pub fn validate_rows(rows: Vec<Vec<f64>>) -> Result<Vec<FeatureVector>, FeatureError> {
    rows.into_iter()
        .enumerate()
        .map(|(row, values)| {
            let got = values.len();
            FeatureVector::new(values).map_err(|_| FeatureError::InvalidRow {
                row,
                expected: FEATURE_DIM,
                got,
            })
        })
        .collect()
}

/// Loads a header-less CSV feature matrix, one 100-value row per packet.
pub fn read_feature_rows<R: Read>(reader: R) -> Result<Vec<FeatureVector>> {
    let mut reader = ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(reader);

    let mut rows = Vec::new();
    for (row, result) in reader.records().enumerate() {
        let record = result.with_context(|| format!("Failed to read feature row {}", row))?;
        let values: Vec<f64> = record
            .deserialize(None)
            .with_context(|| format!("Feature row {} is not numeric", row))?;
        rows.push(values);
    }

    Ok(validate_rows(rows)?)
}

pub fn read_feature_file(path: &str) -> Result<Vec<FeatureVector>> {
    info!("Loading feature matrix: {}", path);
    let file = File::open(path)
        .with_context(|| format!("Failed to open feature file: {}", path))?;
    read_feature_rows(BufReader::new(file))
}
