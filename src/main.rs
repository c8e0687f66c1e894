use ahk_core::config::Config;
use ahk_core::services::{create_window_source, ProcessWatcher, WindowMonitor};
use ahk_core::WaitOutcome;
use anyhow::{Context, Result};
use clap::Parser;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(name = "ahk-core")]
#[command(about = "Отслеживание активного окна и ожидание завершения процессов")]
struct Args {
    /// Путь к файлу конфигурации
    #[arg(short, long, default_value = "ahk.toml")]
    config: String,

    /// Режим сухого запуска (эмуляция окон вместо опроса рабочего стола)
    #[arg(long)]
    dry_run: bool,

    /// Уровень логирования (по умолчанию берётся из конфигурации)
    #[arg(long)]
    log_level: Option<String>,

    /// Дождаться завершения процесса с этим PID и выйти
    #[arg(long)]
    wait_pid: Option<u32>,

    /// Таймаут ожидания процесса в миллисекундах
    #[arg(long, requires = "wait_pid")]
    timeout_ms: Option<u64>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Загрузка конфигурации
    let config = Config::load(&args.config)?;

    // Инициализация системы логирования
    let level = args.log_level.as_deref().unwrap_or(&config.logging.level);
    init_tracing(level, &config.logging.format)?;

    info!("Запуск AHK Core v{}", env!("CARGO_PKG_VERSION"));
    info!("Конфигурация загружена из: {}", args.config);

    if args.dry_run {
        warn!("Режим сухого запуска - окна эмулируются");
    }

    // Ctrl+C отменяет всё, что ждёт этот токен
    let shutdown = CancellationToken::new();
    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            match signal::ctrl_c().await {
                Ok(()) => info!("Получен сигнал завершения (Ctrl+C)"),
                Err(err) => error!("Ошибка при ожидании сигнала завершения: {}", err),
            }
            shutdown.cancel();
        });
    }

    match args.wait_pid {
        Some(pid) => {
            let timeout = args.timeout_ms.map(Duration::from_millis);
            wait_for_process(&config, pid, timeout, shutdown).await
        }
        None => monitor_windows(&config, args.dry_run, shutdown).await,
    }
}

async fn wait_for_process(
    config: &Config,
    pid: u32,
    timeout: Option<Duration>,
    shutdown: CancellationToken,
) -> Result<()> {
    let watcher = ProcessWatcher::new(config.process.poll_interval());
    let process = watcher
        .watch(pid)
        .with_context(|| format!("Не удалось начать наблюдение за процессом {}", pid))?;

    match process.wait_for_exit(timeout, Some(&shutdown)).await {
        WaitOutcome::Completed => {
            info!("Процесс {} завершился", pid);
            Ok(())
        }
        WaitOutcome::TimedOut => anyhow::bail!("Процесс {} не завершился за {:?}", pid, timeout.unwrap_or_default()),
        WaitOutcome::Cancelled => {
            warn!("Ожидание процесса {} прервано", pid);
            Ok(())
        }
    }
}

async fn monitor_windows(config: &Config, dry_run: bool, shutdown: CancellationToken) -> Result<()> {
    let source = create_window_source(config, dry_run)?;
    let monitor = Arc::new(WindowMonitor::new(
        source,
        config.cache.ttl(),
        config.cache.policy,
    )?);

    info!("Все компоненты инициализированы");

    let handle = tokio::spawn(Arc::clone(&monitor).run(config.window.polling_interval(), shutdown.clone()));

    shutdown.cancelled().await;
    info!("Завершение работы...");

    // Ожидаем завершения монитора (с таймаутом)
    match tokio::time::timeout(Duration::from_secs(5), handle).await {
        Ok(Ok(Ok(changes))) => info!("Монитор окон завершил работу, смен окна: {}", changes),
        Ok(Ok(Err(e))) => error!("Ошибка в WindowMonitor: {}", e),
        Ok(Err(e)) => error!("Задача WindowMonitor упала: {}", e),
        Err(_) => warn!("Таймаут при завершении сервисов"),
    }

    info!("AHK Core завершил работу");
    Ok(())
}

fn init_tracing(level: &str, format: &str) -> Result<()> {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))?;

    let registry = tracing_subscriber::registry().with(filter);
    if format == "compact" {
        registry.with(tracing_subscriber::fmt::layer().compact()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }

    Ok(())
}
