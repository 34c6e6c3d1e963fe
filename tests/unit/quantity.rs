//! Unit tests for quantity arithmetic

use spilo_operator::resources::quantity::{ParsedQuantity, quantities_equal, quantity_to_gib};

#[test]
fn test_equal_across_suffixes() {
    assert!(quantities_equal("1Gi", "1024Mi"));
    assert!(quantities_equal("1Gi", "1073741824"));
    assert!(quantities_equal("500m", "0.5"));
    assert!(quantities_equal("1k", "1000"));
    assert!(quantities_equal("1e3", "1k"));
    assert!(quantities_equal("2", "2000m"));
    assert!(!quantities_equal("1G", "1Gi"));
    assert!(!quantities_equal("100m", "1"));
}

#[test]
fn test_unparsable_falls_back_to_spelling() {
    assert!(quantities_equal("lots", "lots"));
    assert!(!quantities_equal("lots", "1Gi"));
}

#[test]
fn test_parse_rejects_garbage() {
    assert!(ParsedQuantity::parse("").is_err());
    assert!(ParsedQuantity::parse("Gi").is_err());
    assert!(ParsedQuantity::parse("10Xi").is_err());
    assert!(ParsedQuantity::parse("1.2.3").is_err());
    assert!(ParsedQuantity::parse("--1").is_err());
}

#[test]
fn test_ordering() {
    let small = ParsedQuantity::parse("512Mi").unwrap();
    let large = ParsedQuantity::parse("1Gi").unwrap();
    assert!(small < large);
    assert!(ParsedQuantity::parse("-1").unwrap() < ParsedQuantity::ZERO);
    assert_eq!(ParsedQuantity::parse("0Gi").unwrap(), ParsedQuantity::ZERO);
}

#[test]
fn test_gibibytes_round_down() {
    assert_eq!(quantity_to_gib("10Gi").unwrap(), 10);
    assert_eq!(quantity_to_gib("1536Mi").unwrap(), 1);
    assert_eq!(quantity_to_gib("10G").unwrap(), 9);
    assert_eq!(quantity_to_gib("1Ti").unwrap(), 1024);
    assert_eq!(quantity_to_gib("512Mi").unwrap(), 0);
    assert!(quantity_to_gib("ten").is_err());
}

#[test]
fn test_gibibytes_beyond_i64_are_rejected() {
    assert!(ParsedQuantity::parse("1e28").is_ok());
    assert!(quantity_to_gib("1e28").is_err());
    assert!(quantity_to_gib("8e27").is_ok());
}
