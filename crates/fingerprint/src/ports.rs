//! Well-known port names

/// Display name for a well-known port, grouped by service family.
pub fn common_service_name(port: u16) -> Option<&'static str> {
    let name = match port {
        // File transfer
        20 => "FTP Data",
        21 => "FTP",
        548 => "AFP",
        873 => "rsync",
        2049 => "NFS",

        // Remote access
        22 => "SSH",
        23 => "Telnet",
        3389 => "RDP",
        5900 => "VNC",

        // Mail
        25 => "SMTP",
        110 => "POP3",
        143 => "IMAP",
        465 => "SMTPS",
        587 => "Submission",
        993 => "IMAPS",
        995 => "POP3S",

        // Infrastructure
        53 => "DNS",
        67 | 68 => "DHCP",
        123 => "NTP",
        161 => "SNMP",
        514 => "Syslog",
        5353 => "mDNS",
        1900 => "SSDP",

        // Web
        80 => "HTTP",
        443 => "HTTPS",
        8080 => "HTTP Alt",
        8443 => "HTTPS Alt",

        // Windows networking
        139 => "NetBIOS",
        445 => "SMB",

        // Chat and news
        119 => "NNTP",
        194 => "IRC",

        // Databases
        1433 => "MSSQL",
        1521 => "Oracle",
        3306 => "MySQL",
        5432 => "PostgreSQL",
        6379 => "Redis",
        27017 => "MongoDB",

        // Home and office devices
        554 => "RTSP",
        631 => "IPP",
        1883 => "MQTT",
        7000 => "AirPlay",
        9100 => "JetDirect",
        62078 => "iPhone Sync",

        _ => return None,
    };
    Some(name)
}
