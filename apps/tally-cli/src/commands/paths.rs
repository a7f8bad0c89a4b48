use anyhow::Result;
use tally_core::effective_settings;

use super::util::print_json;

pub fn run(pretty: bool) -> Result<()> {
    print_json(&effective_settings(), pretty)
}
