use pnet::packet::arp::ArpPacket;
use pnet::packet::ethernet::{EtherType, EtherTypes, EthernetPacket};
use pnet::packet::icmp::{self, IcmpPacket, MutableIcmpPacket};
use pnet::packet::ip::{IpNextHeaderProtocol, IpNextHeaderProtocols};
use pnet::packet::ipv4::{self, Ipv4Packet, MutableIpv4Packet};
use pnet::packet::ipv6::{Ipv6Packet, MutableIpv6Packet};
use pnet::packet::tcp::{self, MutableTcpPacket, TcpPacket};
use pnet::packet::udp::{self, MutableUdpPacket, UdpPacket};
use pnet::packet::vlan::VlanPacket;
use std::fmt;
use std::net::{Ipv4Addr, Ipv6Addr};

use crate::error::CodecError;

/// ICMP header as dissected here: type, code, checksum and the 4-byte rest-of-header.
const ICMP_HEADER_LEN: usize = 8;

/// Shortest IPv6 extension header; every length is a multiple of this.
const IPV6_EXTENSION_UNIT: usize = 8;

/// Cap on stacked VLAN tags and on chained IPv6 extension headers.
const MAX_CHAINED_HEADERS: usize = 8;

/// Protocol layers the rebuilder knows how to probe and truncate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Layer {
    Link,
    /// 802.1Q or 802.1ad tag; walked through, never a truncation target.
    Vlan,
    Ipv4,
    Ipv6,
    Arp,
    Icmp,
    Tcp,
    Udp,
}

impl Layer {
    pub fn name(&self) -> &'static str {
        match self {
            Layer::Link => "Ether",
            Layer::Vlan => "802.1Q",
            Layer::Ipv4 => "IPv4",
            Layer::Ipv6 => "IPv6",
            Layer::Arp => "ARP",
            Layer::Icmp => "ICMP",
            Layer::Tcp => "TCP",
            Layer::Udp => "UDP",
        }
    }
}

impl fmt::Display for Layer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Link-layer framing of a captured packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkKind {
    /// DLT_EN10MB
    Ethernet,
    /// DLT_RAW: the frame starts directly at the IP header
    RawIp,
}

impl LinkKind {
    pub fn from_dlt(dlt: i32) -> Result<Self, CodecError> {
        match dlt {
            1 => Ok(LinkKind::Ethernet),
            12 | 101 => Ok(LinkKind::RawIp),
            other => Err(CodecError::UnsupportedLink(other)),
        }
    }

    pub fn dlt(&self) -> i32 {
        match self {
            LinkKind::Ethernet => 1,
            LinkKind::RawIp => 101,
        }
    }
}

/// Frame bytes as read from a capture, before dissection.
#[derive(Debug, Clone, PartialEq)]
pub struct RawFrame {
    pub data: Vec<u8>,
    pub timestamp: f64, // Seconds since epoch
}

impl RawFrame {
    pub fn new(data: Vec<u8>, timestamp: f64) -> Self {
        Self { data, timestamp }
    }
}

/// Position of one decoded header inside the frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LayerSpan {
    pub layer: Layer,
    pub offset: usize,
    pub header_len: usize,
}

impl LayerSpan {
    pub fn payload_offset(&self) -> usize {
        self.offset + self.header_len
    }
}

/// Capability set the rebuilder needs from a packet codec.
///
/// `Clone` is the deep copy: a clone must share nothing mutable with its source.
pub trait LayeredPacket: Clone {
    /// Whether `layer` is part of the packet's current layer stack.
    fn has_layer(&self, layer: Layer) -> bool;

    /// Drops everything carried after `layer`'s header, keeping the header itself.
    /// Returns false (and leaves the packet alone) when the layer is absent.
    fn remove_payload(&mut self, layer: Layer) -> bool;

    /// Appends opaque bytes as the innermost payload.
    fn append_payload(&mut self, bytes: &[u8]);

    fn timestamp(&self) -> f64;

    fn set_timestamp(&mut self, timestamp: f64);

    /// One-line description of the layer stack, for logging.
    fn summary(&self) -> String;
}

/// A captured frame plus the layer stack decoded from it.
///
/// The stack is decoded once; truncation and payload appends update it
/// directly, so appended bytes are never re-dissected as headers.
#[derive(Debug, Clone, PartialEq)]
pub struct CapturedPacket {
    link: LinkKind,
    data: Vec<u8>,
    layers: Vec<LayerSpan>,
    timestamp: f64,
    /// Set once truncation or an append has changed the captured bytes.
    edited: bool,
}

impl CapturedPacket {
    /// Decodes the layer stack of `data`. Headers that are declared but do not
    /// fit in the captured bytes are an error; unknown upper protocols simply
    /// end the stack.
    pub fn decode(link: LinkKind, data: Vec<u8>, timestamp: f64) -> Result<Self, CodecError> {
        let layers = dissect(link, &data)?;
        Ok(Self {
            link,
            data,
            layers,
            timestamp,
            edited: false,
        })
    }

    pub fn link(&self) -> LinkKind {
        self.link
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Whether the bytes have changed since capture.
    pub fn is_edited(&self) -> bool {
        self.edited
    }

    pub fn layers(&self) -> &[LayerSpan] {
        &self.layers
    }

    pub fn span(&self, layer: Layer) -> Option<&LayerSpan> {
        self.layers.iter().find(|span| span.layer == layer)
    }

    /// Bytes carried after `layer`'s header, if the layer is present.
    pub fn payload_len(&self, layer: Layer) -> Option<usize> {
        self.span(layer)
            .map(|span| self.data.len().saturating_sub(span.payload_offset()))
    }

    /// Frame bytes up to and including `layer`'s header.
    pub fn headers_through(&self, layer: Layer) -> Option<&[u8]> {
        self.span(layer).map(|span| &self.data[..span.payload_offset()])
    }

    /// Bytes after the innermost decoded header.
    fn raw_len(&self) -> usize {
        let start = self.layers.last().map_or(0, LayerSpan::payload_offset);
        self.data.len().saturating_sub(start)
    }

    /// Copy of the frame with length fields and checksums recomputed for the
    /// layers still on the stack. The in-memory packet is left untouched.
    ///
    /// Unedited packets come back byte-for-byte, so link-layer padding on a
    /// captured frame never leaks into its IP or transport lengths.
    pub fn repaired_bytes(&self) -> Vec<u8> {
        let mut bytes = self.data.clone();
        if !self.edited {
            return bytes;
        }
        let end = bytes.len();
        let mut endpoints: Option<Endpoints> = None;

        for span in &self.layers {
            let region = &mut bytes[span.offset..end];
            match span.layer {
                Layer::Link | Layer::Vlan | Layer::Arp => {}
                Layer::Ipv4 => {
                    if let Some(mut ip) = MutableIpv4Packet::new(region) {
                        ip.set_total_length(wire_len(end - span.offset));
                        let checksum = ipv4::checksum(&ip.to_immutable());
                        ip.set_checksum(checksum);
                        endpoints = Some(Endpoints::V4(ip.get_source(), ip.get_destination()));
                    }
                }
                Layer::Ipv6 => {
                    if let Some(mut ip) = MutableIpv6Packet::new(region) {
                        ip.set_payload_length(wire_len(end - span.payload_offset()));
                        endpoints = Some(Endpoints::V6(ip.get_source(), ip.get_destination()));
                    }
                }
                Layer::Udp => {
                    if let Some(mut udp) = MutableUdpPacket::new(region) {
                        udp.set_length(wire_len(end - span.offset));
                        let checksum = match endpoints {
                            Some(Endpoints::V4(src, dst)) => {
                                udp::ipv4_checksum(&udp.to_immutable(), &src, &dst)
                            }
                            Some(Endpoints::V6(src, dst)) => {
                                udp::ipv6_checksum(&udp.to_immutable(), &src, &dst)
                            }
                            None => 0,
                        };
                        udp.set_checksum(checksum);
                    }
                }
                Layer::Tcp => {
                    if let Some(mut tcp) = MutableTcpPacket::new(region) {
                        let checksum = match endpoints {
                            Some(Endpoints::V4(src, dst)) => {
                                tcp::ipv4_checksum(&tcp.to_immutable(), &src, &dst)
                            }
                            Some(Endpoints::V6(src, dst)) => {
                                tcp::ipv6_checksum(&tcp.to_immutable(), &src, &dst)
                            }
                            None => 0,
                        };
                        tcp.set_checksum(checksum);
                    }
                }
                Layer::Icmp => {
                    if let Some(mut icmp) = MutableIcmpPacket::new(region) {
                        let checksum = icmp::checksum(&icmp.to_immutable());
                        icmp.set_checksum(checksum);
                    }
                }
            }
        }

        bytes
    }
}

impl LayeredPacket for CapturedPacket {
    fn has_layer(&self, layer: Layer) -> bool {
        self.span(layer).is_some()
    }

    fn remove_payload(&mut self, layer: Layer) -> bool {
        let Some(index) = self.layers.iter().position(|span| span.layer == layer) else {
            return false;
        };
        let cut = self.layers[index].payload_offset();
        self.data.truncate(cut);
        self.layers.truncate(index + 1);
        self.edited = true;
        true
    }

    fn append_payload(&mut self, bytes: &[u8]) {
        if bytes.is_empty() {
            return;
        }
        self.data.extend_from_slice(bytes);
        self.edited = true;
    }

    fn timestamp(&self) -> f64 {
        self.timestamp
    }

    fn set_timestamp(&mut self, timestamp: f64) {
        self.timestamp = timestamp;
    }

    fn summary(&self) -> String {
        let mut parts: Vec<String> = self.layers.iter().map(|span| span.layer.to_string()).collect();
        let raw = self.raw_len();
        if raw > 0 {
            parts.push(format!("Raw({})", raw));
        }
        if parts.is_empty() {
            return "<empty>".to_string();
        }
        parts.join(" / ")
    }
}

#[derive(Clone, Copy)]
enum Endpoints {
    V4(Ipv4Addr, Ipv4Addr),
    V6(Ipv6Addr, Ipv6Addr),
}

fn wire_len(len: usize) -> u16 {
    u16::try_from(len).unwrap_or(u16::MAX)
}

fn truncated(layer: &'static str, needed: usize, available: usize) -> CodecError {
    CodecError::Truncated {
        layer,
        needed,
        available,
    }
}

fn transport_for(protocol: IpNextHeaderProtocol, over_ipv4: bool) -> Option<Layer> {
    match protocol {
        IpNextHeaderProtocols::Tcp => Some(Layer::Tcp),
        IpNextHeaderProtocols::Udp => Some(Layer::Udp),
        IpNextHeaderProtocols::Icmp if over_ipv4 => Some(Layer::Icmp),
        _ => None,
    }
}

fn is_vlan_tag(ethertype: EtherType) -> bool {
    matches!(
        ethertype,
        EtherTypes::Vlan | EtherTypes::PBridge | EtherTypes::QinQ
    )
}

fn is_ipv6_extension(protocol: IpNextHeaderProtocol) -> bool {
    matches!(
        protocol,
        IpNextHeaderProtocols::Hopopt
            | IpNextHeaderProtocols::Ipv6Route
            | IpNextHeaderProtocols::Ipv6Frag
            | IpNextHeaderProtocols::Ipv6Opts
    )
}

/// Follows the IPv6 extension-header chain that starts at `offset`.
///
/// Returns the upper-layer protocol and the offset of its header, or `None`
/// when a non-first fragment carries no upper-layer header.
fn skip_ipv6_extensions(
    data: &[u8],
    mut offset: usize,
    mut next: IpNextHeaderProtocol,
) -> Result<Option<(IpNextHeaderProtocol, usize)>, CodecError> {
    for _ in 0..MAX_CHAINED_HEADERS {
        if !is_ipv6_extension(next) {
            return Ok(Some((next, offset)));
        }

        let bytes = &data[offset..];
        if bytes.len() < IPV6_EXTENSION_UNIT {
            return Err(truncated("IPv6 extension", IPV6_EXTENSION_UNIT, bytes.len()));
        }
        let header_len = if next == IpNextHeaderProtocols::Ipv6Frag {
            let fragment_offset = u16::from_be_bytes([bytes[2], bytes[3]]) >> 3;
            if fragment_offset != 0 {
                return Ok(None);
            }
            IPV6_EXTENSION_UNIT
        } else {
            (bytes[1] as usize + 1) * IPV6_EXTENSION_UNIT
        };
        if header_len > bytes.len() {
            return Err(truncated("IPv6 extension", header_len, bytes.len()));
        }

        next = IpNextHeaderProtocol::new(bytes[0]);
        offset += header_len;
    }

    Err(CodecError::Malformed {
        layer: "IPv6",
        reason: format!("more than {} extension headers", MAX_CHAINED_HEADERS),
    })
}

fn dissect(link: LinkKind, data: &[u8]) -> Result<Vec<LayerSpan>, CodecError> {
    let mut layers = Vec::with_capacity(4);

    // Layer 2
    let network = match link {
        LinkKind::Ethernet => {
            let ethernet = EthernetPacket::new(data).ok_or_else(|| {
                truncated("Ethernet", EthernetPacket::minimum_packet_size(), data.len())
            })?;
            layers.push(LayerSpan {
                layer: Layer::Link,
                offset: 0,
                header_len: EthernetPacket::minimum_packet_size(),
            });

            let mut ethertype = ethernet.get_ethertype();
            let mut offset = EthernetPacket::minimum_packet_size();
            while is_vlan_tag(ethertype) {
                if layers.len() > MAX_CHAINED_HEADERS {
                    return Err(CodecError::Malformed {
                        layer: "802.1Q",
                        reason: format!("more than {} stacked tags", MAX_CHAINED_HEADERS),
                    });
                }
                let tag = VlanPacket::new(&data[offset..]).ok_or_else(|| {
                    truncated("802.1Q", VlanPacket::minimum_packet_size(), data.len() - offset)
                })?;
                ethertype = tag.get_ethertype();
                layers.push(LayerSpan {
                    layer: Layer::Vlan,
                    offset,
                    header_len: VlanPacket::minimum_packet_size(),
                });
                offset += VlanPacket::minimum_packet_size();
            }

            match ethertype {
                EtherTypes::Ipv4 => Some(Layer::Ipv4),
                EtherTypes::Ipv6 => Some(Layer::Ipv6),
                EtherTypes::Arp => Some(Layer::Arp),
                _ => None,
            }
        }
        LinkKind::RawIp => match data.first().map(|byte| byte >> 4) {
            Some(4) => Some(Layer::Ipv4),
            Some(6) => Some(Layer::Ipv6),
            _ => None,
        },
    };

    let Some(network) = network else {
        return Ok(layers);
    };

    // Layer 3
    let offset = layers.last().map_or(0, LayerSpan::payload_offset);
    let bytes = &data[offset..];
    let transport = match network {
        Layer::Ipv4 => {
            let ip = Ipv4Packet::new(bytes)
                .ok_or_else(|| truncated("IPv4", Ipv4Packet::minimum_packet_size(), bytes.len()))?;
            let header_len = ip.get_header_length() as usize * 4;
            if header_len < Ipv4Packet::minimum_packet_size() {
                return Err(CodecError::Malformed {
                    layer: "IPv4",
                    reason: format!("header length {} below minimum", header_len),
                });
            }
            if header_len > bytes.len() {
                return Err(truncated("IPv4", header_len, bytes.len()));
            }
            layers.push(LayerSpan {
                layer: Layer::Ipv4,
                offset,
                header_len,
            });
            // Only the first fragment carries the transport header
            if ip.get_fragment_offset() == 0 {
                transport_for(ip.get_next_level_protocol(), true)
                    .map(|layer| (layer, offset + header_len))
            } else {
                None
            }
        }
        Layer::Ipv6 => {
            let ip = Ipv6Packet::new(bytes)
                .ok_or_else(|| truncated("IPv6", Ipv6Packet::minimum_packet_size(), bytes.len()))?;
            let header_len = Ipv6Packet::minimum_packet_size();
            layers.push(LayerSpan {
                layer: Layer::Ipv6,
                offset,
                header_len,
            });
            skip_ipv6_extensions(data, offset + header_len, ip.get_next_header())?.and_then(
                |(protocol, upper)| transport_for(protocol, false).map(|layer| (layer, upper)),
            )
        }
        Layer::Arp => {
            let arp = ArpPacket::new(bytes)
                .ok_or_else(|| truncated("ARP", ArpPacket::minimum_packet_size(), bytes.len()))?;
            let header_len =
                8 + 2 * (arp.get_hw_addr_len() as usize + arp.get_proto_addr_len() as usize);
            if header_len > bytes.len() {
                return Err(truncated("ARP", header_len, bytes.len()));
            }
            layers.push(LayerSpan {
                layer: Layer::Arp,
                offset,
                header_len,
            });
            None
        }
        _ => None,
    };

    let Some((transport, offset)) = transport else {
        return Ok(layers);
    };

    // Layer 4
    let bytes = &data[offset..];
    let header_len = match transport {
        Layer::Tcp => {
            let tcp = TcpPacket::new(bytes)
                .ok_or_else(|| truncated("TCP", TcpPacket::minimum_packet_size(), bytes.len()))?;
            let header_len = tcp.get_data_offset() as usize * 4;
            if header_len < TcpPacket::minimum_packet_size() {
                return Err(CodecError::Malformed {
                    layer: "TCP",
                    reason: format!("data offset {} below minimum", header_len),
                });
            }
            header_len
        }
        Layer::Udp => {
            UdpPacket::new(bytes)
                .ok_or_else(|| truncated("UDP", UdpPacket::minimum_packet_size(), bytes.len()))?;
            UdpPacket::minimum_packet_size()
        }
        Layer::Icmp => {
            IcmpPacket::new(bytes)
                .ok_or_else(|| truncated("ICMP", ICMP_HEADER_LEN, bytes.len()))?;
            ICMP_HEADER_LEN
        }
        _ => return Ok(layers),
    };
    if header_len > bytes.len() {
        return Err(truncated(transport.name(), header_len, bytes.len()));
    }
    layers.push(LayerSpan {
        layer: transport,
        offset,
        header_len,
    });

    Ok(layers)
}
