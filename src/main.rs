mod app;
mod catalog;
mod config;
mod db;
mod error;
mod feed;
mod models;
mod notify;
mod subscriptions;
mod sync;
#[cfg(test)]
mod testing;

use chrono::Utc;

use app::App;
use config::Config;
use error::{AppError, Result};
use models::{Fingerprint, NewSubscription, Source, SubscribeOutcome, User};

const USAGE: &str = "usage: porkast-sync [--refresh | --subscribe <user> <keyword> [country] [source] [exclude_ids] | \
--unsubscribe <user> <keyword> [source] | --list <user> | \
--items <user> <keyword> [country] [source] [exclude_ids] | --add-user <id> <email> [nickname] [telegram_id] | \
--episode <source> <podcast_id> <episode_id>]";

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let config = Config::load()?;
    let app = App::new(&config).await?;

    let Some(command) = args.first() else {
        return app.run_scheduler().await;
    };
    let rest = &args[1..];

    match command.as_str() {
        "--refresh" => {
            let report = app.refresh_once().await?;
            println!(
                "Refreshed {} subscriptions: {} notified, {} advanced, {} skipped, {} failed",
                report.subscriptions, report.notified, report.advanced, report.skipped, report.failed
            );
        }

        "--subscribe" => {
            let [user_id, keyword, ..] = rest else {
                return Err(usage());
            };
            let request = NewSubscription {
                user_id: user_id.clone(),
                keyword: keyword.clone(),
                country: arg(rest, 2).unwrap_or("US").to_string(),
                source: arg(rest, 3).unwrap_or_default().parse()?,
                exclude_feed_id: arg(rest, 4).unwrap_or_default().to_string(),
                order_by_date: 0,
            };
            match app.subscriptions.subscribe(request).await? {
                SubscribeOutcome::Created { id, seeded } => {
                    println!("Subscribed ({}), seeded: {}", id, seeded)
                }
                SubscribeOutcome::AlreadySubscribed => println!("Already subscribed"),
            }
        }

        "--unsubscribe" => {
            let [user_id, keyword, ..] = rest else {
                return Err(usage());
            };
            let source: Source = arg(rest, 2).unwrap_or_default().parse()?;
            if app.subscriptions.unsubscribe(user_id, keyword, source).await? {
                println!("Unsubscribed from {}", keyword);
            } else {
                println!("No active subscription for {}", keyword);
            }
        }

        "--list" => {
            let [user_id, ..] = rest else {
                return Err(usage());
            };
            let (subscriptions, total) = app.subscriptions.list_subscriptions(user_id, 0, 100).await?;
            println!("{} active subscriptions", total);
            for sub in subscriptions {
                println!(
                    "  #{} [{}] country={} exclude={:?} watermark={} links={}",
                    sub.keyword, sub.source, sub.country, sub.exclude_feed_id, sub.latest_id, sub.total_count
                );
            }
        }

        "--items" => {
            let [user_id, keyword, ..] = rest else {
                return Err(usage());
            };
            let fingerprint = Fingerprint::new(
                keyword.as_str(),
                arg(rest, 3).unwrap_or_default().parse()?,
                arg(rest, 2).unwrap_or("US"),
                arg(rest, 4).unwrap_or_default(),
            );
            let (items, total) = app
                .subscriptions
                .subscription_items(user_id, &fingerprint, 0, 20)
                .await?;
            println!("{} items for #{}", total, keyword);
            for item in items {
                let date = item
                    .pub_date
                    .map(|d| d.format("%Y-%m-%d").to_string())
                    .unwrap_or_default();
                println!("  {} {} ({})", date, item.title, item.channel_title);
            }
        }

        "--add-user" => {
            let [id, email, ..] = rest else {
                return Err(usage());
            };
            let user = User {
                id: id.clone(),
                nickname: arg(rest, 2).map(str::to_string),
                email: Some(email.clone()),
                telegram_id: arg(rest, 3).map(str::to_string),
                reg_date: Utc::now(),
            };
            app.repository.upsert_user(user).await?;
            println!("Saved user {}", id);
        }

        "--episode" => {
            let [source, podcast_id, episode_id, ..] = rest else {
                return Err(usage());
            };
            let source: Source = source.parse()?;
            let (detail, created) = app
                .lookup_episode(source, podcast_id, episode_id, "US")
                .await?;
            println!(
                "{} / {} ({})",
                detail.channel.title,
                detail.episode.title,
                if created { "stored" } else { "updated" }
            );
        }

        _ => return Err(usage()),
    }

    Ok(())
}

fn arg(args: &[String], index: usize) -> Option<&str> {
    args.get(index).map(String::as_str).filter(|s| !s.is_empty())
}

fn usage() -> AppError {
    AppError::Config(USAGE.to_string())
}
