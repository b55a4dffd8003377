//! Hive 命令行入口
//!
//! 用法：hive [--config <path>] [--trace] <goal...>
//! 加载配置、初始化日志、装配编排器并运行一次目标，最后打印计划状态与输出。

use std::path::PathBuf;

use anyhow::{bail, Context};
use hive::config::load_config;
use hive::{observability, OrchestratorBuilder};

struct Args {
    config: Option<PathBuf>,
    print_trace: bool,
    goal: String,
}

fn parse_args() -> anyhow::Result<Args> {
    let mut config = None;
    let mut print_trace = false;
    let mut words = Vec::new();
    let mut it = std::env::args().skip(1);
    while let Some(arg) = it.next() {
        match arg.as_str() {
            "--config" | "-c" => {
                let path = it.next().context("--config needs a path")?;
                config = Some(PathBuf::from(path));
            }
            "--trace" => print_trace = true,
            "--help" | "-h" => {
                println!("usage: hive [--config <path>] [--trace] <goal...>");
                std::process::exit(0);
            }
            _ => words.push(arg),
        }
    }
    let goal = words.join(" ");
    if goal.trim().is_empty() {
        bail!("no goal given; usage: hive [--config <path>] [--trace] <goal...>");
    }
    Ok(Args {
        config,
        print_trace,
        goal,
    })
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = parse_args()?;
    let cfg = load_config(args.config.clone()).context("Failed to load config")?;
    observability::init(&cfg.app.log_level);

    let workspace = cfg
        .app
        .workspace_root
        .clone()
        .unwrap_or_else(|| PathBuf::from("workspace"));
    std::fs::create_dir_all(&workspace)
        .with_context(|| format!("Failed to create workspace {}", workspace.display()))?;

    let orchestrator = OrchestratorBuilder::new(cfg, &workspace)
        .build()
        .context("Failed to build orchestrator")?;
    let result = orchestrator
        .run(&args.goal)
        .await
        .context("Run could not start")?;

    println!("run {} {}", result.run_id, result.status);
    for s in result.all_subtasks() {
        println!("  [{}] {:<10} {} ({})", s.id, s.status.to_string(), s.title, s.role);
    }
    if let Some(err) = &result.error {
        println!("error: {}", err);
    }
    if let Some(output) = &result.output {
        println!("\n{}", output);
    }
    if args.print_trace {
        let json = serde_json::to_string_pretty(&result.trace).context("Failed to serialize trace")?;
        println!("\n{}", json);
    }

    if result.is_completed() {
        Ok(())
    } else {
        std::process::exit(1)
    }
}
