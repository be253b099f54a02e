use duckscan_rs::ports::{load_ports_from_path, parse_ports, parse_ports_lines};
use duckscan_rs::ScanError;
use std::io::Write;

#[test]
fn parse_single_and_ranges_and_comments() {
    let input = r#"
        # common ports
        22
        80  # http
        443 # https
        8000-8002
        8001  # duplicate
        # blank line follows

    "#;

    let ports = parse_ports_lines(input).expect("parse ok");
    // Dedup, preserve insertion order of first appearance in each range/line
    assert_eq!(ports.as_slice(), &[22, 80, 443, 8000, 8001, 8002]);
}

#[test]
fn comma_spec_expands_ranges() {
    let ports = parse_ports("80,443,1000-1002").expect("parse ok");
    assert_eq!(ports.as_slice(), &[80, 443, 1000, 1001, 1002]);
}

#[test]
fn boundaries() {
    assert!(matches!(parse_ports("0"), Err(ScanError::InvalidPortSpec(_))));
    assert!(matches!(parse_ports("65536"), Err(ScanError::InvalidPortSpec(_))));
    assert_eq!(parse_ports("65535").unwrap().as_slice(), &[65535]);
}

#[test]
fn empty_token_rejected() {
    assert!(matches!(parse_ports("80,,443"), Err(ScanError::InvalidPortSpec(_))));
}

#[test]
fn full_range_expands_completely() {
    let ports = parse_ports("1-65535").unwrap();
    assert_eq!(ports.len(), 65535);
    assert_eq!(ports.as_slice().first(), Some(&1));
    assert_eq!(ports.as_slice().last(), Some(&65535));
}

#[test]
fn ports_file_loads() {
    let mut f = tempfile::NamedTempFile::new().unwrap();
    writeln!(f, "22\n# web\n80-81").unwrap();
    let ports = load_ports_from_path(f.path()).unwrap();
    assert_eq!(ports.as_slice(), &[22, 80, 81]);
}

#[test]
fn invalid_port_rejected() {
    let input = "0\n"; // invalid: out of range
    assert!(parse_ports_lines(input).is_err());
}
