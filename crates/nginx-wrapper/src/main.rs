mod logging;
mod triggers;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use owo_colors::OwoColorize;
use tracing_subscriber::filter::LevelFilter;
use wrapper_core::config;
use wrapper_core::defaults::DEFAULT_CONFIG_PATH;
use wrapper_core::Settings;
use wrapper_events::EventRegistry;
use wrapper_process::plugin::{embedded_plugins, load_all};
use wrapper_process::run::start_nginx;
use wrapper_process::version::read_nginx_version;
use wrapper_process::{fatal_exit, reload_channel, Completion, PluginContext, ProcessMonitor, RunError};

/// Runs nginx in the foreground and exposes its lifecycle as events.
#[derive(Debug, Parser)]
#[command(name = "nginx-wrapper")]
struct Cli {
	/// Path to the configuration file
	#[arg(long, global = true, env = "NW_CONFIG")]
	config: Option<PathBuf>,

	#[command(subcommand)]
	command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
	/// Run NGINX in a process wrapper
	Run,
	/// Output all configuration settings
	Debug,
	/// Print the wrapper version
	Version,
}

#[tokio::main]
async fn main() {
	let cli = Cli::parse();

	if let Command::Version = cli.command {
		println!("nginx-wrapper {}", env!("CARGO_PKG_VERSION"));
		return;
	}

	let settings = match init(cli.config).await {
		Ok(settings) => settings,
		Err(e) => {
			eprintln!("{:#}", e);
			std::process::exit(1);
		}
	};
	let level = match logging::init(&settings) {
		Ok(level) => level,
		Err(e) => {
			eprintln!("{:#}", e);
			std::process::exit(1);
		}
	};

	let result = match cli.command {
		Command::Run => run(settings, level).await,
		Command::Debug => {
			debug(&settings);
			Ok(())
		}
		Command::Version => Ok(()),
	};

	if let Err(e) = result {
		tracing::error!("{:#}", e);
		std::process::exit(1);
	}
}

/// Loads the configuration and fills in what only the nginx binary can
/// tell us.
async fn init(config_path: Option<PathBuf>) -> anyhow::Result<Arc<Settings>> {
	let path = config_path.unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH));
	let settings = config::load(&path)?;

	let binary = config::find_in_path(&settings.get_string("nginx_binary"))?;
	settings.set("nginx_binary", binary.display().to_string());

	let version = read_nginx_version(&binary)
		.await
		.with_context(|| format!("unable to read version of NGINX executable ({})", binary.display()))?;
	version.apply(&settings);

	Ok(Arc::new(settings))
}

fn plugin_context(settings: &Arc<Settings>) -> (PluginContext, wrapper_process::ReloadQueue) {
	let (reload, queue) = reload_channel();
	let context = PluginContext {
		settings: Arc::clone(settings),
		events: Arc::new(EventRegistry::new()),
		reload,
		completion: Completion::new(),
	};
	(context, queue)
}

async fn run(settings: Arc<Settings>, level: LevelFilter) -> anyhow::Result<()> {
	let (context, queue) = plugin_context(&settings);
	let events = Arc::clone(&context.events);
	let completion = context.completion.clone();

	triggers::register_core_triggers(&events, &settings, level >= LevelFilter::DEBUG);
	load_all(&embedded_plugins(), &context, true);
	triggers::log_events(&events);

	let monitor = ProcessMonitor::new(Arc::clone(&events), completion.clone());
	monitor
		.listen(context.reload.clone(), queue)
		.context("unable to install signal handlers")?;

	match start_nginx(&monitor, &settings).await {
		Ok(pid) => tracing::debug!("nginx master process running with pid {}", pid),
		Err(RunError::Fatal(e)) => fatal_exit(e),
		Err(e) => return Err(anyhow::Error::from(e).context("error starting NGINX")),
	}

	completion.wait().await;
	tracing::info!("all processes exited");
	Ok(())
}

/// Prints every known setting, then any setting in the config file the
/// wrapper doesn't recognise.
fn debug(settings: &Arc<Settings>) {
	let (context, _queue) = plugin_context(settings);
	load_all(&embedded_plugins(), &context, false);

	let known = settings.known_keys();
	let width = known.iter().map(String::len).max().unwrap_or(0);
	for key in &known {
		println!("{}: {}", format!("{:>width$}", key).bold(), settings.get_string(key));
	}

	let unknown: Vec<String> = settings
		.all_keys()
		.into_iter()
		.filter(|key| key.matches('.').count() < 2 && !known.contains(key))
		.collect();
	if !unknown.is_empty() {
		println!();
		println!("{}", "The following configuration settings are unknown:".yellow());
		for key in unknown {
			println!("  {}", key);
		}
	}
}
