use std::net::{IpAddr, Ipv4Addr, UdpSocket};

/// Devine l'adresse IP locale utilisée pour les connexions sortantes.
///
/// Un socket UDP « connecté » vers une adresse publique ne génère aucun
/// trafic mais force le système à choisir l'interface de sortie.
/// Retourne `127.0.0.1` si aucune interface n'est utilisable.
pub fn guess_local_ip() -> String {
    outbound_ip()
        .unwrap_or(IpAddr::V4(Ipv4Addr::LOCALHOST))
        .to_string()
}

fn outbound_ip() -> Option<IpAddr> {
    let socket = UdpSocket::bind("0.0.0.0:0").ok()?;
    socket.connect("8.8.8.8:80").ok()?;
    socket.local_addr().ok().map(|addr| addr.ip())
}
