//! Environment layer of the service configuration.
//!
//! Lives in its own test binary because it sets process environment
//! variables; nothing else in this binary reads them.

use std::net::Ipv4Addr;

use arena_orchestrator::config::Config;
use clap::Parser;

#[test]
fn test_env_sits_between_flags_and_defaults() {
    std::env::set_var("IP_POOL_START", "10.50.0.5");
    std::env::set_var("PORT_POOL_END", "5600");
    std::env::remove_var("IP_POOL_END");

    let from_env = Config::try_parse_from(["orchestrator"]);
    let from_flag = Config::try_parse_from(["orchestrator", "--ip-start", "10.60.0.1"]);

    std::env::remove_var("IP_POOL_START");
    std::env::remove_var("PORT_POOL_END");

    let from_env = from_env.unwrap();
    assert_eq!(from_env.ip_start, Ipv4Addr::new(10, 50, 0, 5));
    assert_eq!(from_env.ip_end, Ipv4Addr::new(10, 99, 0, 250));
    assert_eq!(from_env.port_end, 5600);
    assert!(from_env.validate().is_ok());

    let from_flag = from_flag.unwrap();
    assert_eq!(from_flag.ip_start, Ipv4Addr::new(10, 60, 0, 1));
    assert_eq!(from_flag.port_end, 5600);

    let after = Config::try_parse_from(["orchestrator"]).unwrap();
    assert_eq!(after.ip_start, Ipv4Addr::new(10, 99, 0, 10));
}
