use bytes::Bytes;
use pcap::{Capture, Device, Linktype};
use pnet::packet::ethernet::{EtherTypes, EthernetPacket};
use pnet::packet::ip::{IpNextHeaderProtocol, IpNextHeaderProtocols};
use pnet::packet::ipv4::Ipv4Packet;
use pnet::packet::ipv6::Ipv6Packet;
use pnet::packet::tcp::TcpPacket;
use pnet::packet::Packet;
use std::net::{IpAddr, SocketAddr};
use std::time::{Duration, Instant};

use crate::error::{Result, SnifferError};

/// 链路层类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkLayer {
    Ethernet,
    /// BSD loopback: 4 字节协议族头
    Null,
    /// 无链路层头，直接是 IP
    Raw,
}

impl From<Linktype> for LinkLayer {
    fn from(linktype: Linktype) -> Self {
        match linktype.0 {
            0 | 108 => LinkLayer::Null,
            12 | 14 | 101 => LinkLayer::Raw,
            _ => LinkLayer::Ethernet,
        }
    }
}

/// 抓到的一帧
#[derive(Debug, Clone, Copy)]
pub struct Frame<'a> {
    pub link: LinkLayer,
    pub data: &'a [u8],
}

/// 带载荷的 TCP 段
#[derive(Debug, Clone)]
pub struct Segment {
    pub source: SocketAddr,
    pub destination: SocketAddr,
    pub payload: Bytes,
}

impl Segment {
    /// 从链路帧中取出 TCP 段，没有载荷的帧返回 `None`
    pub fn from_frame(frame: Frame<'_>) -> Option<Self> {
        match frame.link {
            LinkLayer::Ethernet => {
                let ethernet = EthernetPacket::new(frame.data)?;
                match ethernet.get_ethertype() {
                    EtherTypes::Ipv4 => Self::from_ipv4(ethernet.payload()),
                    EtherTypes::Ipv6 => Self::from_ipv6(ethernet.payload()),
                    _ => None,
                }
            }
            LinkLayer::Null => Self::from_ip(frame.data.get(4..)?),
            LinkLayer::Raw => Self::from_ip(frame.data),
        }
    }

    fn from_ip(data: &[u8]) -> Option<Self> {
        match data.first()? >> 4 {
            4 => Self::from_ipv4(data),
            6 => Self::from_ipv6(data),
            _ => None,
        }
    }

    fn from_ipv4(data: &[u8]) -> Option<Self> {
        let ip = Ipv4Packet::new(data)?;
        Self::from_tcp(
            IpAddr::V4(ip.get_source()),
            IpAddr::V4(ip.get_destination()),
            ip.get_next_level_protocol(),
            ip.payload(),
        )
    }

    fn from_ipv6(data: &[u8]) -> Option<Self> {
        let ip = Ipv6Packet::new(data)?;
        Self::from_tcp(
            IpAddr::V6(ip.get_source()),
            IpAddr::V6(ip.get_destination()),
            ip.get_next_header(),
            ip.payload(),
        )
    }

    fn from_tcp(
        source: IpAddr,
        destination: IpAddr,
        protocol: IpNextHeaderProtocol,
        data: &[u8],
    ) -> Option<Self> {
        if protocol != IpNextHeaderProtocols::Tcp {
            return None;
        }
        let tcp = TcpPacket::new(data)?;
        if tcp.payload().is_empty() {
            return None;
        }
        Some(Self {
            source: SocketAddr::new(source, tcp.get_source()),
            destination: SocketAddr::new(destination, tcp.get_destination()),
            payload: Bytes::copy_from_slice(tcp.payload()),
        })
    }
}

/// 抓包原语
///
/// `sniff` 持续投递帧，直到 `should_stop` 返回 true、超时或出错。
/// 返回投递的帧数。
pub trait CaptureSource: Send + Sync + 'static {
    /// 将界面显示名解析为抓包层的设备名
    fn resolve(&self, label: &str) -> Result<String>;

    fn sniff(
        &self,
        interface: &str,
        on_frame: &mut dyn FnMut(Frame<'_>),
        should_stop: &dyn Fn() -> bool,
        timeout: Option<Duration>,
    ) -> Result<u64>;

    /// 不带协议过滤地抓包，用于检测接口上是否有任何流量
    fn sniff_any(
        &self,
        interface: &str,
        on_frame: &mut dyn FnMut(Frame<'_>),
        should_stop: &dyn Fn() -> bool,
        timeout: Option<Duration>,
    ) -> Result<u64> {
        self.sniff(interface, on_frame, should_stop, timeout)
    }
}

/// 抓包过滤器
#[derive(Debug, Clone)]
pub struct PacketFilter {
    pub bpf_filter: String,
    pub snapshot_length: i32,
    pub promiscuous: bool,
    pub timeout_ms: i32,
}

impl Default for PacketFilter {
    fn default() -> Self {
        Self {
            bpf_filter: "tcp".to_string(),
            snapshot_length: 65535,
            promiscuous: true,
            timeout_ms: 500,
        }
    }
}

/// 基于 libpcap / Npcap 的抓包实现
#[derive(Debug, Clone, Default)]
pub struct PcapSource {
    filter: PacketFilter,
}

impl PcapSource {
    pub fn new(filter: PacketFilter) -> Self {
        Self { filter }
    }

    fn capture(
        &self,
        interface: &str,
        bpf_filter: &str,
        on_frame: &mut dyn FnMut(Frame<'_>),
        should_stop: &dyn Fn() -> bool,
        timeout: Option<Duration>,
    ) -> Result<u64> {
        let device = Self::find_device(interface)?;

        let mut cap = Capture::from_device(device)?
            .promisc(self.filter.promiscuous)
            .snaplen(self.filter.snapshot_length)
            .timeout(self.filter.timeout_ms)
            .immediate_mode(true)
            .open()?;

        if !bpf_filter.is_empty() {
            cap.filter(bpf_filter, true)?;
        }

        let link = LinkLayer::from(cap.get_datalink());
        log::debug!("Opened {} with link layer {:?}", interface, link);

        let deadline = timeout.map(|t| Instant::now() + t);
        let mut delivered = 0u64;

        loop {
            if should_stop() {
                break;
            }
            if deadline.is_some_and(|d| Instant::now() >= d) {
                break;
            }
            match cap.next_packet() {
                Ok(packet) => {
                    delivered += 1;
                    on_frame(Frame {
                        link,
                        data: packet.data,
                    });
                }
                Err(pcap::Error::TimeoutExpired) => continue,
                Err(e) => return Err(e.into()),
            }
        }

        Ok(delivered)
    }

    fn find_device(name: &str) -> Result<Device> {
        Device::list()?
            .into_iter()
            .find(|dev| dev.name == name)
            .ok_or_else(|| SnifferError::Interface(format!("Interface {} not found", name)))
    }
}

impl CaptureSource for PcapSource {
    fn resolve(&self, label: &str) -> Result<String> {
        let name = super::interface::raw_name(label);
        Ok(Self::find_device(name)?.name)
    }

    fn sniff(
        &self,
        interface: &str,
        on_frame: &mut dyn FnMut(Frame<'_>),
        should_stop: &dyn Fn() -> bool,
        timeout: Option<Duration>,
    ) -> Result<u64> {
        self.capture(interface, &self.filter.bpf_filter, on_frame, should_stop, timeout)
    }

    fn sniff_any(
        &self,
        interface: &str,
        on_frame: &mut dyn FnMut(Frame<'_>),
        should_stop: &dyn Fn() -> bool,
        timeout: Option<Duration>,
    ) -> Result<u64> {
        self.capture(interface, "", on_frame, should_stop, timeout)
    }
}
