//! `relayfetch config` – show where the config lives and what it resolves to.

use anyhow::Result;
use relayfetch_core::config::{self, RelayfetchConfig};
use relayfetch_core::RetrySettings;

pub fn run_config(cfg: &RelayfetchConfig) -> Result<()> {
    println!("config file: {}", config::config_path()?.display());

    if cfg.relays.is_empty() {
        println!("relays: (none configured)");
    } else {
        println!("relays:");
        for relay in cfg.relay_identities()? {
            println!("  {}", relay.endpoint());
        }
    }

    let settings = RetrySettings::from_config(cfg);
    println!("max attempts: {}", settings.max_attempts);
    println!("retry delay: {:?}", settings.backoff_delay);
    println!("blacklist ttl: {:?}", settings.blacklist_ttl);
    println!("overload cooldown: {:?}", cfg.overload_cooldown());
    let curl = cfg.curl_options();
    println!(
        "timeouts: connect {:?}, request {:?}",
        curl.connect_timeout, curl.request_timeout
    );
    Ok(())
}
