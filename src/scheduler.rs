//! The scheduler: converts periodic rules into synthetic input events.
//!
//! Each valid scheduled rule gets its own driver task that fires a
//! self-addressed message onto the ingress channel, re-entering the normal
//! match/execute path. Single-instance by design; there is no clustering.

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::config::Bot;
use crate::models::{Message, MessageType, Rule, Service};

/// How a scheduled rule fires.
enum Cadence {
    Cron(Box<cron::Schedule>),
    Every(Duration),
}

/// Validate scheduled rules and spawn one driver task per valid job. Waits
/// for the room index before starting, since scheduled output targets rooms.
pub async fn start(
    rules: Arc<HashMap<String, Rule>>,
    bot: Arc<Bot>,
    input_tx: mpsc::Sender<Message>,
) {
    bot.wait_rooms_populated().await;

    let mut jobs = 0;
    for rule in rules.values() {
        if !rule.active || rule.schedule.is_empty() {
            continue;
        }
        if !rule.respond.is_empty() || !rule.hear.is_empty() {
            warn!(
                rule = %rule.name,
                "scheduled rule also specifies 'respond'/'hear', skipping"
            );
            continue;
        }
        if rule.output_to_rooms.is_empty() && rule.output_to_users.is_empty() {
            warn!(
                rule = %rule.name,
                "scheduled rule has no 'output_to_rooms' or 'output_to_users', skipping"
            );
            continue;
        }
        let cadence = match parse_schedule(&rule.schedule) {
            Ok(c) => c,
            Err(reason) => {
                warn!(rule = %rule.name, schedule = %rule.schedule, "invalid schedule, skipping: {reason}");
                continue;
            }
        };

        info!(rule = %rule.name, schedule = %rule.schedule, "scheduling rule");
        tokio::spawn(drive(
            rule.clone(),
            cadence,
            Arc::clone(&bot),
            input_tx.clone(),
        ));
        jobs += 1;
    }

    if jobs == 0 {
        info!("no scheduled rules configured");
    }
}

/// Driver loop for one scheduled rule.
async fn drive(rule: Rule, cadence: Cadence, bot: Arc<Bot>, input_tx: mpsc::Sender<Message>) {
    loop {
        let wait = match &cadence {
            Cadence::Every(interval) => *interval,
            Cadence::Cron(schedule) => match schedule.upcoming(Utc).next() {
                Some(next) => match (next - Utc::now()).to_std() {
                    Ok(d) => d,
                    Err(_) => Duration::from_secs(1),
                },
                None => {
                    warn!(rule = %rule.name, "schedule has no future firings, stopping");
                    return;
                }
            },
        };
        tokio::time::sleep(wait).await;

        // A tick is dropped, not queued, when the pipeline has not consumed
        // the previous one yet.
        let msg = as_self_message(&rule, &bot);
        match input_tx.try_send(msg) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                debug!(rule = %rule.name, "previous firing still in flight, skipping tick");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!(rule = %rule.name, "ingress channel closed, stopping schedule");
                return;
            }
        }
    }
}

/// Synthesize the scheduler's self-addressed input event.
fn as_self_message(rule: &Rule, bot: &Bot) -> Message {
    let mut msg = Message::new(Service::Scheduler);
    msg.message_type = MessageType::Channel;
    msg.input = format!("<@{}> ", bot.config.id);
    msg.bot_mentioned = true;
    msg.attributes
        .insert("from_schedule".to_string(), rule.name.clone());
    msg.output_to_rooms = rule.output_to_rooms.clone();
    msg.output_to_users = rule.output_to_users.clone();
    msg
}

/// Parse a schedule: `@every <dur>`, five-field cron (standard), or
/// six-field cron (with seconds).
fn parse_schedule(schedule: &str) -> Result<Cadence, String> {
    if let Some(dur) = schedule.strip_prefix("@every ") {
        return parse_duration(dur.trim()).map(Cadence::Every);
    }
    let fields = schedule.split_whitespace().count();
    let expr = match fields {
        // Standard cron: prepend a seconds field.
        5 => format!("0 {schedule}"),
        6 => schedule.to_string(),
        1 if schedule.starts_with('@') => schedule.to_string(),
        _ => return Err(format!("expected 5 or 6 fields, got {fields}")),
    };
    cron::Schedule::from_str(&expr)
        .map(|s| Cadence::Cron(Box::new(s)))
        .map_err(|e| e.to_string())
}

/// Parse durations of the form `90s`, `5m`, `1h30m`, `250ms`.
fn parse_duration(s: &str) -> Result<Duration, String> {
    if s.is_empty() {
        return Err("empty duration".to_string());
    }
    let mut total = Duration::ZERO;
    let mut rest = s;
    while !rest.is_empty() {
        let digits = rest.chars().take_while(|c| c.is_ascii_digit()).count();
        if digits == 0 {
            return Err(format!("invalid duration '{s}'"));
        }
        let value: u64 = rest[..digits]
            .parse()
            .map_err(|_| format!("invalid duration '{s}'"))?;
        rest = &rest[digits..];
        let (unit_len, unit) = if rest.starts_with("ms") {
            (2, Duration::from_millis(value))
        } else if rest.starts_with('s') {
            (1, Duration::from_secs(value))
        } else if rest.starts_with('m') {
            (1, Duration::from_secs(value * 60))
        } else if rest.starts_with('h') {
            (1, Duration::from_secs(value * 3600))
        } else {
            return Err(format!("unknown unit in duration '{s}'"));
        };
        rest = &rest[unit_len..];
        total += unit;
    }
    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BotConfig;

    #[test]
    fn parses_every_durations() {
        assert!(matches!(
            parse_schedule("@every 5s"),
            Ok(Cadence::Every(d)) if d == Duration::from_secs(5)
        ));
        assert!(matches!(
            parse_schedule("@every 1h30m"),
            Ok(Cadence::Every(d)) if d == Duration::from_secs(5400)
        ));
        assert!(matches!(
            parse_schedule("@every 250ms"),
            Ok(Cadence::Every(d)) if d == Duration::from_millis(250)
        ));
        assert!(parse_schedule("@every soon").is_err());
    }

    #[test]
    fn parses_five_and_six_field_cron() {
        assert!(matches!(parse_schedule("0 * * * *"), Ok(Cadence::Cron(_))));
        assert!(matches!(parse_schedule("*/30 * * * * *"), Ok(Cadence::Cron(_))));
        assert!(parse_schedule("not a cron").is_err());
        assert!(parse_schedule("* * *").is_err());
    }

    #[test]
    fn self_message_shape() {
        let rule = Rule {
            name: "hourly".into(),
            schedule: "@every 1h".into(),
            output_to_rooms: vec!["ops".into()],
            ..Default::default()
        };
        let bot = Bot::new(BotConfig {
            id: "B1".into(),
            ..Default::default()
        });
        let msg = as_self_message(&rule, &bot);
        assert_eq!(msg.service, Service::Scheduler);
        assert_eq!(msg.message_type, MessageType::Channel);
        assert_eq!(msg.input, "<@B1> ");
        assert_eq!(msg.attributes.get("from_schedule").unwrap(), "hourly");
        assert_eq!(msg.output_to_rooms, vec!["ops"]);
    }

    #[tokio::test]
    async fn rejects_conflicting_and_targetless_rules() {
        let rules: HashMap<String, Rule> = [
            Rule {
                name: "conflict".into(),
                schedule: "@every 1s".into(),
                respond: "hi".into(),
                output_to_rooms: vec!["ops".into()],
                active: true,
                ..Default::default()
            },
            Rule {
                name: "targetless".into(),
                schedule: "@every 1s".into(),
                active: true,
                ..Default::default()
            },
        ]
        .into_iter()
        .map(|r| (r.name.clone(), r))
        .collect();

        let (tx, mut rx) = mpsc::channel(1);
        let bot = Arc::new(Bot::new(BotConfig::default()));
        start(Arc::new(rules), bot, tx).await;

        // Neither rule was scheduled, so nothing ever fires.
        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn every_schedule_fires_self_messages() {
        let rules: HashMap<String, Rule> = [(
            "ticker".to_string(),
            Rule {
                name: "ticker".into(),
                schedule: "@every 100ms".into(),
                output_to_rooms: vec!["ops".into()],
                active: true,
                ..Default::default()
            },
        )]
        .into_iter()
        .collect();

        let (tx, mut rx) = mpsc::channel(1);
        let bot = Arc::new(Bot::new(BotConfig {
            id: "B1".into(),
            ..Default::default()
        }));
        start(Arc::new(rules), bot, tx).await;

        let msg = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("scheduled message should fire")
            .expect("channel open");
        assert_eq!(msg.attributes.get("from_schedule").unwrap(), "ticker");
        assert_eq!(msg.output_to_rooms, vec!["ops"]);
    }
}
