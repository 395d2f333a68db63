use anyhow::{Context, Result, anyhow};
use pcap_file::DataLink;
use pcap_file::pcap::{PcapHeader, PcapPacket, PcapWriter};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::time::Duration;
use tracing::info;

use crate::packet::{CapturedPacket, LayeredPacket, LinkKind};

/// Writes rebuilt packets to a pcap stream.
pub struct PcapSink<W: Write> {
    writer: PcapWriter<W>,
    repair_lengths: bool,
    written: usize,
}

impl<W: Write> PcapSink<W> {
    /// With `repair_lengths`, IP/UDP length fields and checksums are
    /// recomputed on the way out; otherwise bytes are written as held.
    pub fn new(writer: W, link: LinkKind, repair_lengths: bool) -> Result<Self> {
        let datalink = match link {
            LinkKind::Ethernet => DataLink::ETHERNET,
            LinkKind::RawIp => DataLink::RAW,
        };
        let header = PcapHeader {
            datalink,
            ..Default::default()
        };
        let writer = PcapWriter::with_header(writer, header)
            .context("Failed to create PCAP writer")?;

        Ok(Self {
            writer,
            repair_lengths,
            written: 0,
        })
    }

    pub fn write(&mut self, packet: &CapturedPacket) -> Result<()> {
        let timestamp = Duration::try_from_secs_f64(packet.timestamp()).map_err(|_| {
            anyhow!(
                "Packet #{} has timestamp {} outside the pcap range",
                self.written + 1,
                packet.timestamp()
            )
        })?;

        let repaired;
        let data = if self.repair_lengths {
            repaired = packet.repaired_bytes();
            repaired.as_slice()
        } else {
            packet.data()
        };

        let pcap_packet = PcapPacket::new(timestamp, data.len() as u32, data);
        self.writer
            .write_packet(&pcap_packet)
            .context("Failed to write PCAP packet")?;

        self.written += 1;
        Ok(())
    }

    pub fn written(&self) -> usize {
        self.written
    }

    pub fn into_inner(self) -> W {
        self.writer.into_writer()
    }
}

/// Writes `packets` to a new pcap file at `output`.
pub fn write_pcap(
    output: &str,
    link: LinkKind,
    packets: &[CapturedPacket],
    repair_lengths: bool,
) -> Result<usize> {
    let file = File::create(output)
        .with_context(|| format!("Failed to create output file: {}", output))?;
    let mut sink = PcapSink::new(BufWriter::new(file), link, repair_lengths)?;

    for packet in packets {
        sink.write(packet)?;

        if sink.written() % 100_000 == 0 {
            info!("Wrote {} packets", sink.written());
        }
    }

    let written = sink.written();
    sink.into_inner()
        .flush()
        .with_context(|| format!("Failed to flush {}", output))?;

    info!("PCAP file written to: {}", output);
    Ok(written)
}
