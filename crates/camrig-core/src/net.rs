// ── Listener construction ──
//
// Sockets for the inbound channels. UDP listeners go through socket2
// so SO_REUSEADDR and SO_RCVBUF can be set before binding.

use std::io;
use std::net::SocketAddr;

use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::{TcpListener, TcpSocket, UdpSocket};
use tracing::debug;

/// Bind a non-blocking UDP socket, optionally asking for a larger
/// kernel receive buffer. Must be called inside a Tokio runtime.
pub(crate) fn bind_udp(address: SocketAddr, recv_buffer: Option<usize>) -> io::Result<UdpSocket> {
    let socket = Socket::new(Domain::for_address(address), Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_reuse_address(true)?;
    if let Some(size) = recv_buffer {
        socket.set_recv_buffer_size(size)?;
        // The kernel may grant less (or report double) what was asked for.
        debug!(%address, requested = size, granted = socket.recv_buffer_size()?, "receive buffer sized");
    }
    socket.set_nonblocking(true)?;
    socket.bind(&address.into())?;
    UdpSocket::from_std(socket.into())
}

/// Bind a TCP listener with an explicit backlog.
pub(crate) fn bind_tcp(address: SocketAddr, backlog: u32) -> io::Result<TcpListener> {
    let socket = match address {
        SocketAddr::V4(_) => TcpSocket::new_v4()?,
        SocketAddr::V6(_) => TcpSocket::new_v6()?,
    };
    socket.set_reuseaddr(true)?;
    socket.bind(address)?;
    socket.listen(backlog)
}
