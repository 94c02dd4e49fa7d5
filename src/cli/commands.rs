use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(name = "pow-ledger")]
pub struct Opt {
    #[arg(
        long = "config",
        global = true,
        help = "TOML file with node settings; environment variables override it"
    )]
    pub config: Option<PathBuf>,
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    #[command(name = "createblockchain", about = "Create a new blockchain")]
    Createblockchain {
        #[arg(help = "The address to send genesis block reward to")]
        address: String,
    },
    #[command(name = "createwallet", about = "Create a new wallet")]
    Createwallet,
    #[command(
        name = "getbalance",
        about = "Get the wallet balance of the target address"
    )]
    GetBalance {
        #[arg(help = "The wallet address")]
        address: String,
    },
    #[command(name = "listaddresses", about = "Print local wallet addresses")]
    ListAddresses,
    #[command(name = "send", about = "Send coins and mine them into a block")]
    Send {
        #[arg(help = "Source wallet address")]
        from: String,
        #[arg(help = "Destination wallet address")]
        to: String,
        #[arg(help = "Amount to send")]
        amount: u64,
    },
    #[command(name = "printchain", about = "Print all blocks in the blockchain")]
    Printchain,
    #[command(name = "reindexutxo", about = "Rebuild UTXO index set")]
    Reindexutxo,
    #[command(name = "startnode", about = "Start a blockchain node")]
    StartNode {
        #[arg(long = "miner", help = "Enable mining mode and send reward to ADDRESS")]
        miner: Option<String>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_send() {
        let opt = Opt::try_parse_from(["pow-ledger", "send", "from", "to", "42"]).unwrap();
        match opt.command {
            Command::Send { from, to, amount } => {
                assert_eq!(from, "from");
                assert_eq!(to, "to");
                assert_eq!(amount, 42);
            }
            other => panic!("unexpected command {other:?}"),
        }
        assert!(opt.config.is_none());
    }

    #[test]
    fn test_parse_startnode_with_config() {
        let opt = Opt::try_parse_from([
            "pow-ledger",
            "startnode",
            "--miner",
            "addr",
            "--config",
            "node.toml",
        ])
        .unwrap();
        assert_eq!(opt.config, Some(PathBuf::from("node.toml")));
        assert!(matches!(
            opt.command,
            Command::StartNode { miner: Some(ref addr) } if addr == "addr"
        ));
    }

    #[test]
    fn test_negative_amount_rejected() {
        assert!(Opt::try_parse_from(["pow-ledger", "send", "a", "b", "-5"]).is_err());
    }
}
