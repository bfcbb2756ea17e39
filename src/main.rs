use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Arg, Command};
use wordcard::app::AppMode;
use wordcard::common::{start_application, StartupConfig};
use wordcard_core::models::CommandKind;

#[tokio::main]
async fn main() -> Result<()> {
    let matches = Command::new("wordcard")
        .version("1.0.0")
        .about("单词卡片后端异步命令处理管道")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("配置文件路径，缺省时依次查找 config/wordcard.toml 和 wordcard.toml"),
        )
        .arg(
            Arg::new("mode")
                .short('m')
                .long("mode")
                .value_name("MODE")
                .help("运行模式")
                .value_parser(["all", "worker", "retry", "replay"])
                .default_value("all"),
        )
        .arg(
            Arg::new("kind")
                .short('k')
                .long("kind")
                .value_name("KIND")
                .help("重放的命令类型 (仅在replay模式下使用)，缺省时重放全部类型")
                .value_parser(["save_card", "save_deck"]),
        )
        .arg(
            Arg::new("limit")
                .long("limit")
                .value_name("N")
                .help("每种命令类型最多重放的消息数")
                .value_parser(clap::value_parser!(usize))
                .default_value("100"),
        )
        .arg(
            Arg::new("expiration-ms")
                .long("expiration-ms")
                .value_name("MS")
                .help("重放消息的过期时间（毫秒）")
                .value_parser(clap::value_parser!(u64)),
        )
        .arg(
            Arg::new("log-level")
                .short('l')
                .long("log-level")
                .value_name("LEVEL")
                .help("日志级别，覆盖配置文件")
                .value_parser(["trace", "debug", "info", "warn", "error"]),
        )
        .arg(
            Arg::new("log-format")
                .long("log-format")
                .value_name("FORMAT")
                .help("日志格式，覆盖配置文件")
                .value_parser(["json", "pretty"]),
        )
        .get_matches();

    let mode = matches
        .get_one::<String>("mode")
        .map(String::as_str)
        .unwrap_or("all")
        .parse::<AppMode>()?;
    let kind = matches
        .get_one::<String>("kind")
        .map(|kind| kind.parse::<CommandKind>())
        .transpose()
        .context("解析命令类型失败")?;

    let startup_config = StartupConfig {
        config_path: matches.get_one::<String>("config").cloned(),
        mode,
        log_level: matches.get_one::<String>("log-level").cloned(),
        log_format: matches.get_one::<String>("log-format").cloned(),
        kind,
        limit: matches.get_one::<usize>("limit").copied().unwrap_or(100),
        expiration: matches
            .get_one::<u64>("expiration-ms")
            .copied()
            .map(Duration::from_millis),
    };

    start_application(startup_config).await
}
