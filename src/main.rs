use clap::Parser;
use log::{error, info, LevelFilter};
use pow_ledger::{
    address_to_pub_key_hash, validate_address, Blockchain, BlockchainError, Command, Config,
    KvStore, Opt, Result, Server, Transaction, UTXOSet, Wallets, GLOBAL_CONFIG,
};
use std::process;

fn main() {
    // I log at Info by default; RUST_LOG can still turn on debug output
    env_logger::builder().filter_level(LevelFilter::Info).init();

    let opt = Opt::parse();
    let config = match Config::load(opt.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            error!("Error: {e}");
            process::exit(1);
        }
    };
    match GLOBAL_CONFIG.write() {
        Ok(mut global) => *global = config.clone(),
        Err(poisoned) => *poisoned.into_inner() = config.clone(),
    }

    if let Err(e) = run_command(opt.command, &config) {
        error!("Error: {e}");
        process::exit(1);
    }
}

fn check_address(address: &str) -> Result<()> {
    if !validate_address(address) {
        return Err(BlockchainError::InvalidAddress(address.to_string()));
    }
    Ok(())
}

fn open_store(config: &Config) -> Result<KvStore> {
    KvStore::open_sled(config.db_path())
}

fn open_chain(config: &Config) -> Result<Blockchain> {
    Blockchain::open_blockchain(open_store(config)?, config.target_bits)
}

fn run_command(command: Command, config: &Config) -> Result<()> {
    match command {
        Command::Createblockchain { address } => {
            check_address(&address)?;
            let blockchain =
                Blockchain::create_blockchain(open_store(config)?, &address, config.target_bits)?;
            let utxo_set = UTXOSet::new(blockchain);
            utxo_set.reindex()?;
            println!("Done!");
        }
        Command::Createwallet => {
            let mut wallets = Wallets::load(&config.data_dir)?;
            let address = wallets.create_wallet()?;
            println!("Your new address: {address}")
        }
        Command::GetBalance { address } => {
            check_address(&address)?;
            let pub_key_hash = address_to_pub_key_hash(&address)?;
            let utxo_set = UTXOSet::new(open_chain(config)?);
            let balance = utxo_set.balance(&pub_key_hash)?;
            println!("Balance of {address}: {balance}");
        }
        Command::ListAddresses => {
            let wallets = Wallets::load(&config.data_dir)?;
            for address in wallets.get_addresses() {
                println!("{address}")
            }
        }
        Command::Send { from, to, amount } => {
            check_address(&from)?;
            check_address(&to)?;
            // I mine the transfer right away; the block reward goes to the
            // configured miner, or to the sender when no miner is set.
            let reward_addr = config.mining_addr.clone().unwrap_or_else(|| from.clone());
            check_address(&reward_addr)?;

            let blockchain = open_chain(config)?;
            let utxo_set = UTXOSet::new(blockchain.clone());
            let wallets = Wallets::load(&config.data_dir)?;

            let transaction =
                Transaction::new_utxo_transaction(&from, &to, amount, &wallets, &utxo_set)?;
            let coinbase_tx = Transaction::new_coinbase_tx(&reward_addr)?;
            let block = blockchain.mine_block(&[coinbase_tx, transaction])?;
            utxo_set.update(&block)?;
            println!("Success!")
        }
        Command::Printchain => {
            for block in open_chain(config)?.iterator()? {
                println!("{}", block?);
            }
        }
        Command::Reindexutxo => {
            let utxo_set = UTXOSet::new(open_chain(config)?);
            utxo_set.reindex()?;
            let count = utxo_set.count_transactions()?;
            println!("Done! There are {count} transactions in the UTXO set.");
        }
        Command::StartNode { miner } => {
            let mining_addr = miner.or_else(|| config.mining_addr.clone());
            if let Some(addr) = &mining_addr {
                check_address(addr)?;
            }

            let blockchain = open_chain(config).map_err(|e| match e {
                BlockchainError::NotFound(_) => BlockchainError::NotFound(format!(
                    "No blockchain in {}; run createblockchain first",
                    config.data_dir.display()
                )),
                other => other,
            })?;
            // I rebuild the index on startup so it matches whatever is on disk
            UTXOSet::new(blockchain.clone()).reindex()?;

            let server = Server::from_config(config, blockchain);
            if let Some(addr) = mining_addr {
                info!("Mining is on. Address to receive rewards: {addr}");
                server.start_miner(addr, config.mining_interval());
            }
            server.run()?
        }
    }
    Ok(())
}
