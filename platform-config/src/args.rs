//! Process invocation (spec.md §6). Grounded on
//! `original_source/src/platform/components/startup/command_line.c`'s `ParseCommandLine`,
//! ported from `getopt_long` onto `clap::Parser` while keeping the original's long option
//! spellings so operators' existing invocations keep working.

use crate::pool_spec::PoolSpec;
use clap::Parser;

pub const MAX_NODE_ID: u8 = 3;

const DEFAULT_POOL_CONFIG: &str = "4,256:16384:64,512:1024:32,1024:1024:16,2048:1024:8";

#[derive(Debug, Parser)]
#[command(name = "menabrea", about = "Multi-core, multi-node event-driven worker runtime")]
pub struct Args {
    /// This node's identifier in `[0, MAX_NODE_ID]`. Required; there is no default.
    #[arg(long = "nodeId", value_parser = clap::value_parser!(u8).range(0..=MAX_NODE_ID as i64))]
    pub node_id: u8,

    /// Ethernet interface used for inter-node messaging.
    #[arg(long = "netIf", default_value = "eth0")]
    pub net_if: String,

    /// Pool spec for the default application event pool.
    #[arg(long = "defaultPoolConfig", default_value = DEFAULT_POOL_CONFIG)]
    pub default_pool_config: PoolSpec,

    /// Pool spec for the internal messaging event pool.
    #[arg(long = "messagingPoolConfig", default_value = DEFAULT_POOL_CONFIG)]
    pub messaging_pool_config: PoolSpec,
}
