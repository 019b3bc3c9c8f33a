use log::{error, info};
use pcap::Device;
use std::net::{IpAddr, Ipv4Addr};

use crate::error::Result;

/// 跳过的虚拟网卡关键字
const VIRTUAL_KEYWORDS: &[&str] = &["loopback", "vmware", "virtualbox", "hyper-v", "bluetooth"];
const VPN_KEYWORDS: &[&str] = &["vpn", "virtual", "虚拟"];
const MAX_DESCRIPTION_LEN: usize = 50;

/// 从显示名中取出接口名(格式: `name [状态] - 描述`)
pub fn raw_name(label: &str) -> &str {
    label.split(" [").next().unwrap_or(label).trim()
}

/// 是否为普通单播 IPv4 地址
pub fn is_usable_ipv4(ip: Ipv4Addr) -> bool {
    let [first, second, ..] = ip.octets();
    !(first == 0
        || first == 127
        || (first == 169 && second == 254)
        || first == 224
        || first == 240
        || ip.is_broadcast())
}

/// 构造接口显示名
pub fn display_label(name: &str, active: bool, description: &str) -> String {
    let status = if active { "connected" } else { "disconnected" };
    let description = if description.chars().count() > MAX_DESCRIPTION_LEN {
        let head: String = description.chars().take(47).collect();
        format!("{}...", head)
    } else {
        description.to_string()
    };
    format!("{} [{}] - {}", name, status, description)
}

/// 接口的基本信息
#[derive(Debug, Clone)]
pub struct InterfaceInfo {
    pub name: String,
    pub description: String,
    pub addresses: Vec<IpAddr>,
    pub loopback: bool,
}

impl From<Device> for InterfaceInfo {
    fn from(device: Device) -> Self {
        Self {
            loopback: device.flags.is_loopback(),
            addresses: device.addresses.iter().map(|a| a.addr).collect(),
            description: device.desc.unwrap_or_default(),
            name: device.name,
        }
    }
}

impl InterfaceInfo {
    fn is_virtual(&self) -> bool {
        let desc = self.description.to_lowercase();
        self.loopback || VIRTUAL_KEYWORDS.iter().any(|k| desc.contains(k))
    }

    fn is_vpn(&self) -> bool {
        let desc = self.description.to_lowercase();
        VPN_KEYWORDS.iter().any(|k| desc.contains(k))
    }

    fn usable_ipv4(&self) -> Option<Ipv4Addr> {
        self.addresses.iter().find_map(|addr| match addr {
            IpAddr::V4(v4) if is_usable_ipv4(*v4) => Some(*v4),
            _ => None,
        })
    }
}

/// 可选接口列表
#[derive(Debug, Clone, Default)]
pub struct InterfaceListing {
    /// 已连接的排在前面
    pub interfaces: Vec<String>,
    pub default: Option<String>,
    pub active_count: usize,
}

impl InterfaceListing {
    pub fn from_infos(infos: impl IntoIterator<Item = InterfaceInfo>) -> Self {
        let mut active = Vec::new();
        let mut inactive = Vec::new();
        let mut default = None;

        for info in infos {
            if info.addresses.is_empty() || info.is_virtual() {
                continue;
            }

            let ipv4 = info.usable_ipv4();
            let is_active = ipv4.is_some();
            let is_vpn = info.is_vpn();
            let label = display_label(&info.name, is_active, &info.description);

            info!(
                "Interface {} ({}) type={} status={} ipv4={}",
                info.name,
                info.description,
                if is_vpn { "vpn/virtual" } else { "physical" },
                if is_active { "connected" } else { "disconnected" },
                ipv4.map(|ip| ip.to_string()).unwrap_or_else(|| "none".to_string()),
            );

            if is_active {
                let desc = info.description.to_lowercase();
                if default.is_none() && !is_vpn && (desc.contains("ethernet") || desc.contains("以太网")) {
                    default = Some(label.clone());
                }
                active.push(label);
            } else {
                inactive.push(label);
            }
        }

        let active_count = active.len();
        active.extend(inactive);
        Self {
            interfaces: active,
            default,
            active_count,
        }
    }
}

pub struct InterfaceManager;

impl InterfaceManager {
    /// 列出可用于抓包的接口
    pub fn load() -> Result<InterfaceListing> {
        let devices = Device::list().map_err(|e| {
            error!("Failed to list capture devices: {}", e);
            e
        })?;
        Ok(InterfaceListing::from_infos(
            devices.into_iter().map(InterfaceInfo::from),
        ))
    }
}
