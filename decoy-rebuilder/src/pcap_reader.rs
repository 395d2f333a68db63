use anyhow::{Context, Result};
use pcap::{Capture, Error as PcapError, Offline};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{debug, info, warn};

use crate::packet::{CapturedPacket, LayeredPacket, LinkKind, RawFrame};

#[derive(Debug)]
pub struct CaptureAnalysis {
    pub link: LinkKind,
    pub total_packets: u64,
    pub duration_seconds: f64,
    /// Packet count per layer-stack summary, e.g. `Ether / IPv4 / TCP`.
    pub stacks: BTreeMap<String, u64>,
}

/// Sequential reader over an offline capture file.
pub struct PcapReader {
    capture: Capture<Offline>,
    link: LinkKind,
    sequence: u64,
    file_path: String,
}

impl PcapReader {
    pub fn new(file_path: &str) -> Result<Self> {
        debug!("Opening PCAP file with libpcap: {}", file_path);

        let path = Path::new(file_path);
        let capture = Capture::from_file(path)
            .with_context(|| format!("Failed to open PCAP file: {}", file_path))?;
        let link = LinkKind::from_dlt(capture.get_datalink().0)
            .with_context(|| format!("Unsupported capture link type in {}", file_path))?;

        debug!("PCAP file opened successfully, link type {:?}", link);

        Ok(Self {
            capture,
            link,
            sequence: 0,
            file_path: file_path.to_string(),
        })
    }

    pub fn link(&self) -> LinkKind {
        self.link
    }

    pub fn next_frame(&mut self) -> Result<Option<RawFrame>> {
        let packet = match self.capture.next_packet() {
            Ok(packet) => packet,
            Err(PcapError::NoMorePackets) => return Ok(None),
            Err(e) => {
                return Err(e).with_context(|| {
                    format!("Error reading packet #{} of {}", self.sequence + 1, self.file_path)
                });
            }
        };

        self.sequence += 1;

        if packet.header.caplen < packet.header.len {
            warn!(
                "Packet #{} captured {} of {} bytes",
                self.sequence, packet.header.caplen, packet.header.len
            );
        }

        let timestamp =
            packet.header.ts.tv_sec as f64 + packet.header.ts.tv_usec as f64 / 1_000_000.0;

        Ok(Some(RawFrame::new(packet.data.to_vec(), timestamp)))
    }

    /// Reads every remaining frame.
    pub fn read_all(&mut self) -> Result<Vec<RawFrame>> {
        let mut frames = Vec::new();
        while let Some(frame) = self.next_frame()? {
            frames.push(frame);

            if frames.len() % 100_000 == 0 {
                info!("Read {} packets so far...", frames.len());
            }
        }
        info!("Read {} packets from {}", frames.len(), self.file_path);
        Ok(frames)
    }

    /// Decodes every remaining frame to summarise the capture's layer stacks.
    pub fn analyze(mut self) -> Result<CaptureAnalysis> {
        info!("Analyzing PCAP file: {}", self.file_path);

        let mut stacks = BTreeMap::new();
        let mut packet_count = 0u64;
        let mut first_timestamp: Option<f64> = None;
        let mut last_timestamp: Option<f64> = None;

        while let Some(frame) = self.next_frame()? {
            packet_count += 1;
            first_timestamp.get_or_insert(frame.timestamp);
            last_timestamp = Some(frame.timestamp);

            let packet = CapturedPacket::decode(self.link, frame.data, frame.timestamp)
                .with_context(|| format!("Failed to decode packet #{}", packet_count))?;
            debug!(
                "Packet {}: {} at {:.6}",
                packet_count,
                packet.summary(),
                packet.timestamp()
            );

            let stack = packet
                .layers()
                .iter()
                .map(|span| span.layer.name())
                .collect::<Vec<_>>()
                .join(" / ");
            *stacks.entry(stack).or_insert(0) += 1;
        }

        let duration_seconds = match (first_timestamp, last_timestamp) {
            (Some(first), Some(last)) => (last - first).max(0.0),
            _ => 0.0,
        };

        if packet_count == 0 {
            warn!("No packets found in {}", self.file_path);
        }

        Ok(CaptureAnalysis {
            link: self.link,
            total_packets: packet_count,
            duration_seconds,
            stacks,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CodecError;
    use crate::pcap_writer::write_pcap;
    use crate::testutil;
    use pcap_file::DataLink;
    use pcap_file::pcap::{PcapHeader, PcapPacket, PcapWriter};
    use std::fs::File;
    use std::time::Duration;
    use tempfile::TempDir;

    fn write_anchors(dir: &TempDir) -> String {
        let path = dir.path().join("anchors.pcap").to_string_lossy().into_owned();
        let packets = vec![
            testutil::ethernet_packet(testutil::ipv4_tcp_frame(b"one"), 1.5),
            testutil::ethernet_packet(testutil::ipv4_udp_frame(b"two"), 2.25),
            testutil::ethernet_packet(testutil::ipv4_tcp_frame(b"three"), 3.125),
        ];
        write_pcap(&path, LinkKind::Ethernet, &packets, false).unwrap();
        path
    }

    #[test]
    fn test_read_all() {
        let dir = TempDir::new().unwrap();
        let path = write_anchors(&dir);

        let mut reader = PcapReader::new(&path).unwrap();
        assert_eq!(reader.link(), LinkKind::Ethernet);

        let frames = reader.read_all().unwrap();
        assert_eq!(frames.len(), 3);
        let times: Vec<f64> = frames.iter().map(|f| f.timestamp).collect();
        assert_eq!(times, vec![1.5, 2.25, 3.125]);
        assert_eq!(frames[0].data, testutil::ipv4_tcp_frame(b"one"));
        assert_eq!(frames[1].data, testutil::ipv4_udp_frame(b"two"));
    }

    #[test]
    fn test_analyze_counts_stacks() {
        let dir = TempDir::new().unwrap();
        let path = write_anchors(&dir);

        let analysis = PcapReader::new(&path).unwrap().analyze().unwrap();
        assert_eq!(analysis.link, LinkKind::Ethernet);
        assert_eq!(analysis.total_packets, 3);
        assert_eq!(analysis.duration_seconds, 1.625);
        assert_eq!(analysis.stacks.get("Ether / IPv4 / TCP"), Some(&2));
        assert_eq!(analysis.stacks.get("Ether / IPv4 / UDP"), Some(&1));
        assert_eq!(analysis.stacks.len(), 2);
    }

    #[test]
    fn test_raw_ip_link() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("raw.pcap").to_string_lossy().into_owned();
        let frame = testutil::ipv4_udp_frame(b"raw")[14..].to_vec();
        let packet = CapturedPacket::decode(LinkKind::RawIp, frame.clone(), 7.0).unwrap();
        write_pcap(&path, LinkKind::RawIp, &[packet], false).unwrap();

        let mut reader = PcapReader::new(&path).unwrap();
        assert_eq!(reader.link(), LinkKind::RawIp);
        let frames = reader.read_all().unwrap();
        assert_eq!(frames, vec![RawFrame::new(frame, 7.0)]);
    }

    #[test]
    fn test_unsupported_link_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("sll.pcap");
        {
            let header = PcapHeader {
                datalink: DataLink::LINUX_SLL,
                ..Default::default()
            };
            let mut writer = PcapWriter::with_header(File::create(&path).unwrap(), header).unwrap();
            let data = [0u8; 32];
            writer
                .write_packet(&PcapPacket::new(Duration::from_secs(1), 32, &data))
                .unwrap();
        }

        let err = PcapReader::new(&path.to_string_lossy()).err().unwrap();
        assert!(
            err.chain()
                .any(|cause| cause.downcast_ref::<CodecError>()
                    == Some(&CodecError::UnsupportedLink(113))),
            "{:#}",
            err
        );
    }
}
