//! Frame builders shared by the unit tests.

use pnet::packet::arp::{ArpHardwareTypes, ArpOperations, MutableArpPacket};
use pnet::packet::ethernet::{EtherType, EtherTypes, MutableEthernetPacket};
use pnet::packet::icmp::{IcmpTypes, MutableIcmpPacket};
use pnet::packet::ip::{IpNextHeaderProtocol, IpNextHeaderProtocols};
use pnet::packet::ipv4::{self, MutableIpv4Packet};
use pnet::packet::ipv6::MutableIpv6Packet;
use pnet::packet::tcp::MutableTcpPacket;
use pnet::packet::udp::MutableUdpPacket;
use pnet::util::MacAddr;
use std::net::{Ipv4Addr, Ipv6Addr};

use crate::packet::{CapturedPacket, LinkKind};

const SRC_MAC: MacAddr = MacAddr(0x00, 0xAA, 0xBB, 0xCC, 0xDD, 0xEE);
const DST_MAC: MacAddr = MacAddr(0x00, 0x11, 0x22, 0x33, 0x44, 0x55);

fn ethernet(frame: &mut [u8], ethertype: EtherType) {
    let mut eth = MutableEthernetPacket::new(frame).unwrap();
    eth.set_source(SRC_MAC);
    eth.set_destination(DST_MAC);
    eth.set_ethertype(ethertype);
}

fn ipv4(frame: &mut [u8], protocol: IpNextHeaderProtocol) {
    let total = frame.len() as u16;
    let mut ip = MutableIpv4Packet::new(frame).unwrap();
    ip.set_version(4);
    ip.set_header_length(5);
    ip.set_total_length(total);
    ip.set_ttl(64);
    ip.set_next_level_protocol(protocol);
    ip.set_source(Ipv4Addr::new(192, 168, 1, 1));
    ip.set_destination(Ipv4Addr::new(192, 168, 1, 100));
    let checksum = ipv4::checksum(&ip.to_immutable());
    ip.set_checksum(checksum);
}

pub fn ipv4_tcp_frame(payload: &[u8]) -> Vec<u8> {
    let mut frame = vec![0u8; 14 + 20 + 20 + payload.len()];
    ethernet(&mut frame, EtherTypes::Ipv4);
    ipv4(&mut frame[14..], IpNextHeaderProtocols::Tcp);
    {
        let mut tcp = MutableTcpPacket::new(&mut frame[34..]).unwrap();
        tcp.set_source(12345);
        tcp.set_destination(80);
        tcp.set_sequence(1);
        tcp.set_data_offset(5);
        tcp.set_window(1024);
    }
    frame[54..].copy_from_slice(payload);
    frame
}

pub fn ipv4_udp_frame(payload: &[u8]) -> Vec<u8> {
    let mut frame = vec![0u8; 14 + 20 + 8 + payload.len()];
    ethernet(&mut frame, EtherTypes::Ipv4);
    ipv4(&mut frame[14..], IpNextHeaderProtocols::Udp);
    {
        let mut udp = MutableUdpPacket::new(&mut frame[34..]).unwrap();
        udp.set_source(12345);
        udp.set_destination(30501);
        udp.set_length(8 + payload.len() as u16);
    }
    frame[42..].copy_from_slice(payload);
    frame
}

pub fn ipv4_icmp_frame(payload: &[u8]) -> Vec<u8> {
    let mut frame = vec![0u8; 14 + 20 + 8 + payload.len()];
    ethernet(&mut frame, EtherTypes::Ipv4);
    ipv4(&mut frame[14..], IpNextHeaderProtocols::Icmp);
    {
        let mut icmp = MutableIcmpPacket::new(&mut frame[34..]).unwrap();
        icmp.set_icmp_type(IcmpTypes::EchoRequest);
    }
    frame[42..].copy_from_slice(payload);
    frame
}

pub fn ipv6_udp_frame(payload: &[u8]) -> Vec<u8> {
    let mut frame = vec![0u8; 14 + 40 + 8 + payload.len()];
    ethernet(&mut frame, EtherTypes::Ipv6);
    {
        let mut ip = MutableIpv6Packet::new(&mut frame[14..]).unwrap();
        ip.set_version(6);
        ip.set_payload_length(8 + payload.len() as u16);
        ip.set_next_header(IpNextHeaderProtocols::Udp);
        ip.set_hop_limit(64);
        ip.set_source(Ipv6Addr::LOCALHOST);
        ip.set_destination(Ipv6Addr::LOCALHOST);
    }
    {
        let mut udp = MutableUdpPacket::new(&mut frame[54..]).unwrap();
        udp.set_source(5353);
        udp.set_destination(53);
        udp.set_length(8 + payload.len() as u16);
    }
    frame[62..].copy_from_slice(payload);
    frame
}

/// ARP request; `trailer` lands after the ARP header (Ethernet padding).
pub fn arp_frame(trailer: &[u8]) -> Vec<u8> {
    let mut frame = vec![0u8; 14 + 28 + trailer.len()];
    ethernet(&mut frame, EtherTypes::Arp);
    {
        let mut arp = MutableArpPacket::new(&mut frame[14..]).unwrap();
        arp.set_hardware_type(ArpHardwareTypes::Ethernet);
        arp.set_protocol_type(EtherTypes::Ipv4);
        arp.set_hw_addr_len(6);
        arp.set_proto_addr_len(4);
        arp.set_operation(ArpOperations::Request);
        arp.set_sender_hw_addr(SRC_MAC);
        arp.set_sender_proto_addr(Ipv4Addr::new(192, 168, 1, 1));
        arp.set_target_hw_addr(MacAddr::zero());
        arp.set_target_proto_addr(Ipv4Addr::new(192, 168, 1, 100));
    }
    frame[42..].copy_from_slice(trailer);
    frame
}

pub fn ethernet_packet(frame: Vec<u8>, timestamp: f64) -> CapturedPacket {
    CapturedPacket::decode(LinkKind::Ethernet, frame, timestamp).unwrap()
}

/// Inserts an 802.1Q tag after the Ethernet addresses; the frame's own
/// ethertype becomes the tag's inner ethertype.
pub fn vlan_tagged(frame: &[u8], vlan_id: u16) -> Vec<u8> {
    let mut tagged = Vec::with_capacity(frame.len() + 4);
    tagged.extend_from_slice(&frame[..12]);
    tagged.extend_from_slice(&EtherTypes::Vlan.0.to_be_bytes());
    tagged.extend_from_slice(&(vlan_id & 0x0fff).to_be_bytes());
    tagged.extend_from_slice(&frame[12..]);
    tagged
}

/// IPv6/UDP with an 8-byte Hop-by-Hop header (one PadN option) in between.
pub fn ipv6_hop_by_hop_udp_frame(payload: &[u8]) -> Vec<u8> {
    let mut frame = vec![0u8; 14 + 40 + 8 + 8 + payload.len()];
    ethernet(&mut frame, EtherTypes::Ipv6);
    {
        let mut ip = MutableIpv6Packet::new(&mut frame[14..]).unwrap();
        ip.set_version(6);
        ip.set_payload_length(16 + payload.len() as u16);
        ip.set_next_header(IpNextHeaderProtocols::Hopopt);
        ip.set_hop_limit(64);
        ip.set_source(Ipv6Addr::LOCALHOST);
        ip.set_destination(Ipv6Addr::LOCALHOST);
    }
    frame[54..62].copy_from_slice(&[IpNextHeaderProtocols::Udp.0, 0, 1, 4, 0, 0, 0, 0]);
    {
        let mut udp = MutableUdpPacket::new(&mut frame[62..]).unwrap();
        udp.set_source(5353);
        udp.set_destination(53);
        udp.set_length(8 + payload.len() as u16);
    }
    frame[70..].copy_from_slice(payload);
    frame
}
