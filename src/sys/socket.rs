use std::io;
use std::mem;
use std::net::{self, SocketAddr};
use std::os::unix::io::{AsRawFd, IntoRawFd, RawFd};
use std::os::unix::io::FromRawFd;

use libc::{self, c_int, c_void, socklen_t};

use super::fd::FileDesc;

pub const BACKLOG: c_int = 1024;

pub fn setsockopt<T>(fd: RawFd, opt: c_int, val: c_int, payload: T) -> io::Result<()> {
    let payload = &payload as *const T as *const c_void;
    syscall!(setsockopt(
        fd,
        opt,
        val,
        payload,
        mem::size_of::<T>() as socklen_t
    ))?;
    Ok(())
}

fn addr_to_storage(addr: &SocketAddr) -> (libc::sockaddr_storage, socklen_t) {
    let mut storage: libc::sockaddr_storage = unsafe { mem::zeroed() };

    match addr {
        SocketAddr::V4(a) => {
            let sin = libc::sockaddr_in {
                sin_family: libc::AF_INET as libc::sa_family_t,
                sin_port: a.port().to_be(),
                sin_addr: libc::in_addr {
                    s_addr: u32::from_ne_bytes(a.ip().octets()),
                },
                sin_zero: [0; 8],
            };
            unsafe { *(&mut storage as *mut _ as *mut libc::sockaddr_in) = sin };
            (storage, mem::size_of::<libc::sockaddr_in>() as socklen_t)
        }
        SocketAddr::V6(a) => {
            let sin6 = libc::sockaddr_in6 {
                sin6_family: libc::AF_INET6 as libc::sa_family_t,
                sin6_port: a.port().to_be(),
                sin6_flowinfo: a.flowinfo(),
                sin6_addr: libc::in6_addr {
                    s6_addr: a.ip().octets(),
                },
                sin6_scope_id: a.scope_id(),
            };
            unsafe { *(&mut storage as *mut _ as *mut libc::sockaddr_in6) = sin6 };
            (storage, mem::size_of::<libc::sockaddr_in6>() as socklen_t)
        }
    }
}

/// Opens a non-blocking listening socket with address reuse enabled.
pub fn listener(addr: &SocketAddr) -> io::Result<net::TcpListener> {
    let fam = match addr {
        SocketAddr::V4(..) => libc::AF_INET,
        SocketAddr::V6(..) => libc::AF_INET6,
    };

    let fd = syscall!(socket(fam, libc::SOCK_STREAM | libc::SOCK_CLOEXEC, 0))?;
    let fd = unsafe { FileDesc::new(fd) };

    setsockopt(fd.as_raw_fd(), libc::SOL_SOCKET, libc::SO_REUSEADDR, 1 as c_int)?;

    let (storage, len) = addr_to_storage(addr);
    syscall!(bind(
        fd.as_raw_fd(),
        &storage as *const _ as *const libc::sockaddr,
        len
    ))?;
    syscall!(listen(fd.as_raw_fd(), BACKLOG))?;

    let listener = unsafe { net::TcpListener::from_raw_fd(fd.into_raw_fd()) };
    listener.set_nonblocking(true)?;

    Ok(listener)
}

#[cfg(test)]
mod test {
    use super::listener;

    #[test]
    fn bind_ephemeral() {
        let l = listener(&"127.0.0.1:0".parse().unwrap()).unwrap();
        let addr = l.local_addr().unwrap();
        assert_ne!(addr.port(), 0);
    }

    #[test]
    fn address_reuse() {
        let first = listener(&"127.0.0.1:0".parse().unwrap()).unwrap();
        let addr = first.local_addr().unwrap();
        drop(first);
        // A fresh bind to the just-released port must not fail with AddrInUse.
        let second = listener(&addr).unwrap();
        assert_eq!(second.local_addr().unwrap().port(), addr.port());
    }
}
