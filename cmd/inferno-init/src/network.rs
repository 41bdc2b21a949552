//! Step 10-11: bring up the loopback and primary guest interfaces, assign
//! static addresses from the image config, install a default route, and
//! write `/etc/resolv.conf` and `/etc/hosts`.
//!
//! Static addressing: `SIOCSIFADDR`/`SIOCSIFNETMASK` ioctls plus a
//! `/proc/net/route` entry for the default gateway, alongside the usual
//! `SIOCGIFFLAGS`/`SIOCSIFFLAGS` up/down dance.

use std::ffi::CString;
use std::fs;
use std::mem;
use std::net::Ipv4Addr;
use std::os::fd::AsRawFd;

use anyhow::{bail, Context, Result};

use pkg_constants::network::{DEFAULT_NAMESERVER, GUEST_IFACE, GUEST_LOOPBACK_IFACE};
use pkg_types::config::IpConfig;

const IFNAMSIZ: usize = 16;

#[repr(C)]
struct IfReqFlags {
    ifr_name: [libc::c_char; IFNAMSIZ],
    ifr_flags: libc::c_short,
}

#[repr(C)]
struct IfReqAddr {
    ifr_name: [libc::c_char; IFNAMSIZ],
    ifr_addr: libc::sockaddr_in,
}

fn ifname_bytes(name: &str) -> [libc::c_char; IFNAMSIZ] {
    let mut buf = [0 as libc::c_char; IFNAMSIZ];
    for (i, b) in name.bytes().take(IFNAMSIZ - 1).enumerate() {
        buf[i] = b as libc::c_char;
    }
    buf
}

fn ioctl_socket() -> Result<std::os::fd::OwnedFd> {
    use std::os::fd::FromRawFd;
    let fd = unsafe { libc::socket(libc::AF_INET, libc::SOCK_DGRAM, 0) };
    if fd < 0 {
        bail!(std::io::Error::last_os_error());
    }
    Ok(unsafe { std::os::fd::OwnedFd::from_raw_fd(fd) })
}

/// Bring an interface up (`IFF_UP | IFF_RUNNING`).
pub fn bring_interface_up(name: &str) -> Result<()> {
    let sock = ioctl_socket()?;

    let mut req = IfReqFlags {
        ifr_name: ifname_bytes(name),
        ifr_flags: 0,
    };
    let ret = unsafe { libc::ioctl(sock.as_raw_fd(), libc::SIOCGIFFLAGS, &mut req) };
    if ret < 0 {
        return Err(std::io::Error::last_os_error()).with_context(|| format!("SIOCGIFFLAGS {name}"));
    }

    req.ifr_flags |= (libc::IFF_UP | libc::IFF_RUNNING) as libc::c_short;
    let ret = unsafe { libc::ioctl(sock.as_raw_fd(), libc::SIOCSIFFLAGS, &req) };
    if ret < 0 {
        return Err(std::io::Error::last_os_error()).with_context(|| format!("SIOCSIFFLAGS {name}"));
    }
    Ok(())
}

fn sockaddr_in(addr: Ipv4Addr) -> libc::sockaddr_in {
    libc::sockaddr_in {
        sin_family: libc::AF_INET as libc::sa_family_t,
        sin_port: 0,
        sin_addr: libc::in_addr {
            s_addr: u32::from_ne_bytes(addr.octets()),
        },
        sin_zero: [0; 8],
    }
}

fn set_addr(sock: &std::os::fd::OwnedFd, name: &str, ioctl_num: libc::c_ulong, addr: Ipv4Addr) -> Result<()> {
    let req = IfReqAddr {
        ifr_name: ifname_bytes(name),
        ifr_addr: sockaddr_in(addr),
    };
    let ret = unsafe { libc::ioctl(sock.as_raw_fd(), ioctl_num, &req) };
    if ret < 0 {
        return Err(std::io::Error::last_os_error())
            .with_context(|| format!("ioctl({ioctl_num:#x}) on {name} with {addr}"));
    }
    Ok(())
}

fn prefix_to_netmask(prefix: u8) -> Ipv4Addr {
    if prefix == 0 {
        return Ipv4Addr::new(0, 0, 0, 0);
    }
    let bits: u32 = u32::MAX << (32 - prefix as u32);
    Ipv4Addr::from(bits)
}

/// Assign an address and netmask to an interface (`SIOCSIFADDR` /
/// `SIOCSIFNETMASK`).
pub fn assign_address(name: &str, ip: &IpConfig) -> Result<()> {
    let sock = ioctl_socket()?;
    let addr: Ipv4Addr = ip.ip.parse().with_context(|| format!("parsing IP {}", ip.ip))?;
    set_addr(&sock, name, libc::SIOCSIFADDR, addr)?;
    let mask = prefix_to_netmask(ip.prefix);
    set_addr(&sock, name, libc::SIOCSIFNETMASK, mask)?;
    Ok(())
}

/// Install a default route via the gateway using `/proc/net/route`'s sibling
/// ioctl, `SIOCADDRT`.
pub fn add_default_route(name: &str, gateway: &str) -> Result<()> {
    let gw: Ipv4Addr = gateway.parse().with_context(|| format!("parsing gateway {gateway}"))?;
    let sock = ioctl_socket()?;

    #[repr(C)]
    struct RtEntry {
        rt_pad1: libc::c_ulong,
        rt_dst: libc::sockaddr_in,
        rt_gateway: libc::sockaddr_in,
        rt_genmask: libc::sockaddr_in,
        rt_flags: libc::c_ushort,
        rt_pad2: libc::c_short,
        rt_pad3: libc::c_ulong,
        rt_tos: libc::c_uchar,
        rt_class: libc::c_uchar,
        rt_pad4: [libc::c_short; 3],
        rt_metric: libc::c_short,
        rt_dev: *mut libc::c_char,
        rt_mtu: libc::c_ulong,
        rt_window: libc::c_ulong,
        rt_irtt: libc::c_ushort,
    }

    let dev_name = CString::new(name).context("interface name has interior NUL")?;
    let mut rt: RtEntry = unsafe { mem::zeroed() };
    rt.rt_dst = sockaddr_in(Ipv4Addr::new(0, 0, 0, 0));
    rt.rt_genmask = sockaddr_in(Ipv4Addr::new(0, 0, 0, 0));
    rt.rt_gateway = sockaddr_in(gw);
    rt.rt_flags = (libc::RTF_UP | libc::RTF_GATEWAY) as libc::c_ushort;
    rt.rt_dev = dev_name.as_ptr() as *mut libc::c_char;

    const SIOCADDRT: libc::c_ulong = 0x890B;
    let ret = unsafe { libc::ioctl(sock.as_raw_fd(), SIOCADDRT, &rt) };
    if ret < 0 {
        return Err(std::io::Error::last_os_error()).with_context(|| format!("SIOCADDRT via {gateway} dev {name}"));
    }
    Ok(())
}

/// Bring up loopback, then configure the primary guest interface with every
/// address the image requests and a default route from the first gateway
/// present.
pub fn setup_networking(ips: &[IpConfig]) -> Result<()> {
    bring_interface_up(GUEST_LOOPBACK_IFACE)?;

    if ips.is_empty() {
        return Ok(());
    }

    bring_interface_up(GUEST_IFACE)?;
    for ip in ips {
        assign_address(GUEST_IFACE, ip)?;
    }
    if let Some(first) = ips.first() {
        add_default_route(GUEST_IFACE, &first.gateway)?;
    }
    Ok(())
}

/// Step 11: `/etc/resolv.conf` and `/etc/hosts`, written relative to the
/// new root (`/rootfs`).
pub fn write_resolv_conf(nameservers: &[String]) -> Result<()> {
    let servers: Vec<&str> = if nameservers.is_empty() {
        vec![DEFAULT_NAMESERVER]
    } else {
        nameservers.iter().map(String::as_str).collect()
    };
    let mut contents = String::new();
    for ns in servers {
        contents.push_str(&format!("nameserver {ns}\n"));
    }
    fs::write("/rootfs/etc/resolv.conf", contents).context("writing /etc/resolv.conf")
}

pub fn write_etc_hosts(entries: &[pkg_types::config::HostsEntry]) -> Result<()> {
    let mut contents = String::from(
        "127.0.0.1\tlocalhost\n::1\tlocalhost ip6-localhost ip6-loopback\nfe00::0\tip6-localnet\nff00::0\tip6-mcastprefix\nff02::1\tip6-allnodes\nff02::2\tip6-allrouters\n",
    );
    for entry in entries {
        contents.push_str(&format!("{}\t{}\n", entry.ip, entry.hostnames.join(" ")));
    }
    fs::write("/rootfs/etc/hosts", contents).context("writing /etc/hosts")
}
