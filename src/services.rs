/// Label returned for ports that are not in the catalog.
pub const UNKNOWN_SERVICE: &str = "Unknown";

const CATALOG: &[(u16, &str)] = &[
    (21, "FTP"),
    (22, "SSH"),
    (23, "Telnet"),
    (25, "SMTP"),
    (53, "DNS"),
    (80, "HTTP"),
    (110, "POP3"),
    (135, "RPC"),
    (139, "NetBIOS"),
    (143, "IMAP"),
    (443, "HTTPS"),
    (993, "IMAPS"),
    (995, "POP3S"),
    (1433, "MSSQL"),
    (1521, "Oracle"),
    (1723, "PPTP"),
    (3306, "MySQL"),
    (3389, "RDP"),
    (5432, "PostgreSQL"),
    (5433, "PostgreSQL-Alt"),
    (5900, "VNC"),
    (6379, "Redis"),
    (8080, "HTTP-Alt"),
    (8443, "HTTPS-Alt"),
    (9090, "Openfire"),
    (9200, "Elasticsearch"),
    (27017, "MongoDB"),
];

/// Map a well-known port to a human readable service name, or [`UNKNOWN_SERVICE`].
pub fn lookup_service(port: u16) -> &'static str {
    CATALOG
        .binary_search_by_key(&port, |(p, _)| *p)
        .map(|i| CATALOG[i].1)
        .unwrap_or(UNKNOWN_SERVICE)
}
