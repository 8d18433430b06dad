//! snmprec-store 命令行
//!
//! ```bash
//! snmprec-store --data-dir ./data index --validate
//! snmprec-store --data-dir ./data get public 1.3.6.1.2.1.1.1.0
//! snmprec-store --data-dir ./data walk public --from 1.3.6.1.2.1.2
//! ```

use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use snmprec_store::core::{Oid, Value, VarBind};
use snmprec_store::record::Tag;
use snmprec_store::{AgentRegistry, Config, RequestInfo, Responder};
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "snmprec-store")]
#[command(about = "Ordered record store for recorded SNMP agent data", version)]
struct Cli {
    /// TOML 配置文件
    #[arg(long, short = 'c', env = "SNMPREC_STORE_CONFIG")]
    config: Option<PathBuf>,

    /// 追加数据根目录（可重复）
    #[arg(long = "data-dir")]
    data_dirs: Vec<PathBuf>,

    /// 索引目录
    #[arg(long)]
    cache_dir: Option<PathBuf>,

    /// 同时打开的数据文件上限
    #[arg(long)]
    capacity: Option<usize>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// 构建（或校验）全部索引
    Index {
        #[arg(long)]
        force: bool,
        #[arg(long)]
        validate: bool,
    },
    /// GET
    Get { agent: String, oids: Vec<String> },
    /// GETNEXT
    Next { agent: String, oids: Vec<String> },
    /// SET：`<oid> <tag> <value>`
    Set {
        agent: String,
        oid: String,
        tag: String,
        value: String,
    },
    /// 从某个 OID 开始顺序遍历
    Walk {
        agent: String,
        #[arg(long, default_value = "0")]
        from: String,
        #[arg(long)]
        limit: Option<usize>,
    },
    /// 列出 agent 并打印统计
    Stats,
}

fn parse_oids(texts: &[String]) -> anyhow::Result<Vec<VarBind>> {
    texts
        .iter()
        .map(|t| {
            t.parse::<Oid>()
                .map(|oid| (oid, Value::Null))
                .map_err(|_| anyhow::anyhow!("bad OID {:?}", t))
        })
        .collect()
}

fn print(vars: &[VarBind]) {
    for (oid, value) in vars {
        println!("{} = {}", oid, value);
    }
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let mut cfg = match &cli.config {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };
    cfg.data_dirs.extend(cli.data_dirs.iter().cloned());
    if let Some(dir) = &cli.cache_dir {
        cfg.cache_dir = dir.clone();
    }
    if let Some(n) = cli.capacity {
        cfg.handle_cache_capacity = n;
    }
    if let Command::Index { force, validate } = &cli.command {
        cfg.force_index_build |= *force;
        cfg.validate_data |= *validate;
    }
    cfg.validate()?;

    info!(
        "Starting snmprec-store: {} data dir(s), cache at {}",
        cfg.data_dirs.len(),
        cfg.cache_dir.display()
    );
    let registry = AgentRegistry::from_config(&cfg).context("loading agents")?;

    match cli.command {
        Command::Index { .. } => {
            let mut failed = 0usize;
            for (id, result) in registry.index_all() {
                match result {
                    Ok(n) => println!("{:<40} {:>8} records", id, n),
                    Err(e) => {
                        failed += 1;
                        println!("{:<40} FAILED: {}", id, e);
                    }
                }
            }
            if failed > 0 {
                anyhow::bail!("{} data file(s) failed to index", failed);
            }
        }
        Command::Get { agent, oids } => {
            let out = registry.read(&parse_oids(&oids)?, &RequestInfo::for_context(agent));
            print(&out);
        }
        Command::Next { agent, oids } => {
            let out = registry.read_next(&parse_oids(&oids)?, &RequestInfo::for_context(agent));
            print(&out);
        }
        Command::Set {
            agent,
            oid,
            tag,
            value,
        } => {
            let oid: Oid = oid.parse().map_err(|_| anyhow::anyhow!("bad OID {:?}", oid))?;
            let tag = Tag::parse(&tag).map_err(|e| anyhow::anyhow!(e))?;
            let vt = tag
                .value_type
                .ok_or_else(|| anyhow::anyhow!("SET needs a value type tag"))?;
            let value = if tag.hex {
                vt.decode_hex(&value)
            } else {
                vt.decode(&value)
            }
            .map_err(|e| anyhow::anyhow!(e))?;
            let out = registry.write(&[(oid, value)], &RequestInfo::for_context(agent));
            print(&out);
        }
        Command::Walk { agent, from, limit } => {
            let mut current: Oid = from.parse().map_err(|_| anyhow::anyhow!("bad OID {:?}", from))?;
            let request = RequestInfo::for_context(agent);
            let mut count = 0usize;
            loop {
                if limit.is_some_and(|l| count >= l) {
                    break;
                }
                let out = registry.read_next(&[(current.clone(), Value::Null)], &request);
                let Some((oid, value)) = out.into_iter().next() else { break };
                if value.is_sentinel() || oid <= current {
                    break;
                }
                println!("{} = {}", oid, value);
                current = oid;
                count += 1;
            }
            info!("Walked {} record(s)", count);
        }
        Command::Stats => {
            for id in registry.identities() {
                println!("{}", id);
            }
            print!("{}", registry.report());
        }
    }

    registry.modules().shutdown();
    Ok(())
}
