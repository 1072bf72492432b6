use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand, ValueEnum};
use herald_core::domain::{NotificationKind, QueueStatus};

#[derive(Debug, Parser)]
#[command(name = "herald", version, about = "Notification dispatch queue")]
pub struct Cli {
    /// SQLite URL; overrides HERALD_DATABASE_URL
    #[arg(long, global = true)]
    pub database_url: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run workers, the recovery sweeper and the retention cleaner until Ctrl-C
    Run {
        /// Overrides HERALD_WORKER_PREFIX
        #[arg(long)]
        worker_prefix: Option<String>,
        #[arg(long)]
        workers: Option<usize>,
        #[arg(long)]
        batch_size: Option<u32>,
    },

    /// Create a notification and enqueue it
    Notify {
        #[arg(long, value_parser = parse_kind, default_value = "general")]
        kind: NotificationKind,
        #[arg(long)]
        to: String,
        #[arg(long)]
        subject: String,
        #[arg(long)]
        body: String,
        #[command(flatten)]
        schedule: ScheduleArgs,
    },

    /// Enqueue an existing notification by id
    Enqueue {
        notification_id: String,
        #[command(flatten)]
        schedule: ScheduleArgs,
    },

    /// Cancel a pending or processing item
    Cancel { id: String },

    /// Copy a failed or cancelled item into a fresh pending one
    Requeue {
        id: String,
        #[arg(long)]
        priority: Option<u8>,
        #[arg(long)]
        max_attempts: Option<u32>,
        #[arg(long)]
        at: Option<DateTime<Utc>>,
    },

    /// Show one queue item
    Show { id: String },

    /// List queue items, newest first
    List {
        #[arg(long, value_parser = parse_status)]
        status: Option<QueueStatus>,
        #[arg(long, default_value_t = 50)]
        limit: u32,
        #[arg(long, default_value_t = 0)]
        offset: u32,
    },

    /// Queue and delivery statistics over a recent window
    Stats {
        #[arg(long, default_value_t = 24)]
        hours: i64,
    },

    /// Return items stuck in processing to pending
    Sweep {
        /// Defaults to HERALD_LEASE_TIMEOUT_SECS
        #[arg(long)]
        lease_secs: Option<u64>,
    },

    /// Delete terminal queue items and delivery records past retention
    Purge,

    /// Delivery history for one address
    History {
        email: String,
        #[arg(long, default_value_t = 20)]
        limit: u32,
        #[arg(long, default_value_t = 0)]
        offset: u32,
    },

    /// Apply a provider callback to the delivery with this provider message id
    Event {
        provider_message_id: String,
        #[arg(value_enum)]
        event: EventKind,
        #[arg(long, default_value = "")]
        reason: String,
    },
}

#[derive(Debug, clap::Args)]
pub struct ScheduleArgs {
    #[arg(long)]
    pub priority: Option<u8>,
    #[arg(long)]
    pub max_attempts: Option<u32>,
    /// RFC 3339 time; defaults to now
    #[arg(long)]
    pub at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum EventKind {
    Delivered,
    Bounced,
    Failed,
}

fn parse_kind(s: &str) -> Result<NotificationKind, String> {
    s.parse()
}

fn parse_status(s: &str) -> Result<QueueStatus, String> {
    s.parse()
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn command_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn notify_parses_kind_and_schedule() {
        let cli = Cli::try_parse_from([
            "herald",
            "notify",
            "--kind",
            "overdue_reminder",
            "--to",
            "reader@example.org",
            "--subject",
            "Overdue",
            "--body",
            "Please return it.",
            "--priority",
            "2",
        ])
        .unwrap();

        match cli.command {
            Command::Notify { kind, schedule, .. } => {
                assert_eq!(kind, NotificationKind::OverdueReminder);
                assert_eq!(schedule.priority, Some(2));
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn list_rejects_unknown_status() {
        assert!(Cli::try_parse_from(["herald", "list", "--status", "lost"]).is_err());
    }
}
