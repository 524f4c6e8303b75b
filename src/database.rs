//! # Database
//!
//! SQLite persistence for reminders and contact details.
//!
//! - **Version**: 2.0.0
//! - **Since**: 0.1.0
//!
//! ## Changelog
//! - 2.0.0: Reminder schema with recurrence, task and version columns; contacts table
//! - 1.0.0: Initial schema

use crate::core::StoreError;
use crate::features::notifications::{ContactBook, Recipient};
use crate::features::reminders::{Reminder, ReminderStore};
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use log::info;
use sqlite::{Connection, State, Statement, Value};
use std::sync::Arc;
use tokio::sync::Mutex;

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS reminders (
        id TEXT PRIMARY KEY,
        request_id TEXT NOT NULL,
        user_id TEXT,
        subject TEXT,
        message TEXT NOT NULL,
        channels TEXT NOT NULL DEFAULT '[]',
        recurrence TEXT NOT NULL,
        every INTEGER NOT NULL DEFAULT 1,
        occurrence INTEGER NOT NULL DEFAULT 0,
        triggered_time TEXT,
        next_trigger_time TEXT NOT NULL,
        upto TEXT,
        task_id TEXT,
        version INTEGER NOT NULL DEFAULT 0,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    );
    CREATE INDEX IF NOT EXISTS idx_reminders_task_id ON reminders(task_id);
    CREATE TABLE IF NOT EXISTS contacts (
        user_id TEXT PRIMARY KEY,
        email TEXT,
        phone TEXT,
        telegram_chat_id TEXT
    );
";

const REMINDER_COLUMNS: &str = "id, request_id, user_id, subject, message, channels, recurrence, \
     every, occurrence, triggered_time, next_trigger_time, upto, task_id, version, created_at, updated_at";

#[derive(Clone)]
pub struct Database {
    connection: Arc<Mutex<Connection>>,
}

fn ts(t: DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

fn text(s: &str) -> Value {
    Value::String(s.to_string())
}

fn opt_text(s: Option<String>) -> Value {
    s.map(Value::String).unwrap_or(Value::Null)
}

fn parse_ts(raw: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| StoreError::Backend(format!("bad timestamp {raw:?}: {e}")))
}

fn parse_opt_ts(raw: Option<String>) -> Result<Option<DateTime<Utc>>, StoreError> {
    raw.as_deref().map(parse_ts).transpose()
}

fn bind_all(statement: &mut Statement<'_>, values: Vec<Value>) -> Result<(), StoreError> {
    for (index, value) in values.into_iter().enumerate() {
        statement.bind((index + 1, value))?;
    }
    Ok(())
}

fn read_reminder(statement: &Statement<'_>) -> Result<Reminder, StoreError> {
    let channels: String = statement.read("channels")?;
    let recurrence: String = statement.read("recurrence")?;
    Ok(Reminder {
        id: statement.read("id")?,
        request_id: statement.read("request_id")?,
        user_id: statement.read("user_id")?,
        subject: statement.read("subject")?,
        message: statement.read("message")?,
        channels: serde_json::from_str(&channels)
            .map_err(|e| StoreError::Backend(format!("bad channels column: {e}")))?,
        recurrence: recurrence
            .parse()
            .map_err(|e: anyhow::Error| StoreError::Backend(e.to_string()))?,
        every: statement.read::<i64, _>("every")?.max(1) as u32,
        occurrence: statement.read::<i64, _>("occurrence")?.max(0) as u32,
        triggered_time: parse_opt_ts(statement.read("triggered_time")?)?,
        next_trigger_time: parse_ts(&statement.read::<String, _>("next_trigger_time")?)?,
        upto: parse_opt_ts(statement.read("upto")?)?,
        task_id: statement.read("task_id")?,
        version: statement.read::<i64, _>("version")?.max(0) as u64,
        created_at: parse_ts(&statement.read::<String, _>("created_at")?)?,
        updated_at: parse_ts(&statement.read::<String, _>("updated_at")?)?,
    })
}

impl Database {
    /// Open (or create) the database file and apply the schema
    pub async fn new(path: &str) -> Result<Self> {
        let connection = Connection::open(path)?;
        connection.execute(SCHEMA)?;
        info!("Database ready at {path}");
        Ok(Self {
            connection: Arc::new(Mutex::new(connection)),
        })
    }

    /// Insert or replace the contact details of a user
    pub async fn upsert_contact(&self, recipient: &Recipient) -> Result<()> {
        let user_id = recipient
            .user_id
            .clone()
            .ok_or_else(|| anyhow::anyhow!("Contact requires a user_id"))?;
        let conn = self.connection.lock().await;
        let mut statement = conn.prepare(
            "INSERT INTO contacts (user_id, email, phone, telegram_chat_id) VALUES (?, ?, ?, ?)
             ON CONFLICT(user_id) DO UPDATE SET
                email = excluded.email,
                phone = excluded.phone,
                telegram_chat_id = excluded.telegram_chat_id",
        )?;
        bind_all(
            &mut statement,
            vec![
                Value::String(user_id),
                opt_text(recipient.email.clone()),
                opt_text(recipient.phone.clone()),
                opt_text(recipient.telegram_chat_id.clone()),
            ],
        )?;
        while statement.next()? != State::Done {}
        Ok(())
    }

    /// Number of stored reminders
    pub async fn count_reminders(&self) -> Result<usize> {
        let conn = self.connection.lock().await;
        let mut statement = conn.prepare("SELECT COUNT(*) AS n FROM reminders")?;
        let mut count = 0;
        if statement.next()? == State::Row {
            count = statement.read::<i64, _>("n")?.max(0) as usize;
        }
        Ok(count)
    }
}

#[async_trait]
impl ReminderStore for Database {
    async fn create(&self, reminder: &Reminder) -> Result<Reminder, StoreError> {
        let channels = serde_json::to_string(&reminder.channels)
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        let conn = self.connection.lock().await;
        let mut statement = conn.prepare(format!(
            "INSERT INTO reminders ({REMINDER_COLUMNS}) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"
        ))?;
        bind_all(
            &mut statement,
            vec![
                text(&reminder.id),
                text(&reminder.request_id),
                opt_text(reminder.user_id.clone()),
                opt_text(reminder.subject.clone()),
                text(&reminder.message),
                Value::String(channels),
                Value::String(reminder.recurrence.to_string()),
                Value::Integer(i64::from(reminder.every)),
                Value::Integer(i64::from(reminder.occurrence)),
                opt_text(reminder.triggered_time.map(ts)),
                Value::String(ts(reminder.next_trigger_time)),
                opt_text(reminder.upto.map(ts)),
                opt_text(reminder.task_id.clone()),
                Value::Integer(reminder.version as i64),
                Value::String(ts(reminder.created_at)),
                Value::String(ts(reminder.updated_at)),
            ],
        )?;
        while statement.next()? != State::Done {}
        Ok(reminder.clone())
    }

    async fn get_by_id(&self, id: &str) -> Result<Reminder, StoreError> {
        let conn = self.connection.lock().await;
        let mut statement =
            conn.prepare(format!("SELECT {REMINDER_COLUMNS} FROM reminders WHERE id = ?"))?;
        statement.bind((1, id))?;
        if statement.next()? == State::Row {
            read_reminder(&statement)
        } else {
            Err(StoreError::NotFound(id.to_string()))
        }
    }

    async fn update(&self, reminder: &Reminder) -> Result<Reminder, StoreError> {
        let channels = serde_json::to_string(&reminder.channels)
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        let mut next = reminder.clone();
        next.version = reminder.version + 1;
        next.updated_at = Utc::now();

        let conn = self.connection.lock().await;
        {
            let mut statement = conn.prepare(
                "UPDATE reminders SET
                    request_id = ?, user_id = ?, subject = ?, message = ?, channels = ?,
                    recurrence = ?, every = ?, occurrence = ?, triggered_time = ?,
                    next_trigger_time = ?, upto = ?, task_id = ?, version = ?, updated_at = ?
                 WHERE id = ? AND version = ?",
            )?;
            bind_all(
                &mut statement,
                vec![
                    text(&next.request_id),
                    opt_text(next.user_id.clone()),
                    opt_text(next.subject.clone()),
                    text(&next.message),
                    Value::String(channels),
                    Value::String(next.recurrence.to_string()),
                    Value::Integer(i64::from(next.every)),
                    Value::Integer(i64::from(next.occurrence)),
                    opt_text(next.triggered_time.map(ts)),
                    Value::String(ts(next.next_trigger_time)),
                    opt_text(next.upto.map(ts)),
                    opt_text(next.task_id.clone()),
                    Value::Integer(next.version as i64),
                    Value::String(ts(next.updated_at)),
                    text(&reminder.id),
                    Value::Integer(reminder.version as i64),
                ],
            )?;
            while statement.next()? != State::Done {}
        }

        if conn.change_count() > 0 {
            return Ok(next);
        }

        // Nothing matched: tell a missing row from a stale version
        let mut statement = conn.prepare("SELECT version FROM reminders WHERE id = ?")?;
        statement.bind((1, reminder.id.as_str()))?;
        if statement.next()? == State::Row {
            let found = statement.read::<i64, _>("version")?.max(0) as u64;
            Err(StoreError::Conflict {
                id: reminder.id.clone(),
                expected: reminder.version,
                found,
            })
        } else {
            Err(StoreError::NotFound(reminder.id.clone()))
        }
    }

    async fn delete(&self, id: &str) -> Result<(), StoreError> {
        let conn = self.connection.lock().await;
        {
            let mut statement = conn.prepare("DELETE FROM reminders WHERE id = ?")?;
            statement.bind((1, id))?;
            while statement.next()? != State::Done {}
        }
        if conn.change_count() == 0 {
            return Err(StoreError::NotFound(id.to_string()));
        }
        Ok(())
    }

    async fn list_scheduled(&self) -> Result<Vec<Reminder>, StoreError> {
        let conn = self.connection.lock().await;
        let mut statement = conn.prepare(format!(
            "SELECT {REMINDER_COLUMNS} FROM reminders
             WHERE task_id IS NOT NULL ORDER BY next_trigger_time"
        ))?;
        let mut reminders = Vec::new();
        while statement.next()? == State::Row {
            reminders.push(read_reminder(&statement)?);
        }
        Ok(reminders)
    }
}

#[async_trait]
impl ContactBook for Database {
    async fn lookup(&self, user_id: &str) -> Result<Option<Recipient>> {
        let conn = self.connection.lock().await;
        let mut statement = conn.prepare(
            "SELECT user_id, email, phone, telegram_chat_id FROM contacts WHERE user_id = ?",
        )?;
        statement.bind((1, user_id))?;
        if statement.next()? == State::Row {
            Ok(Some(Recipient {
                user_id: Some(statement.read("user_id")?),
                email: statement.read("email")?,
                phone: statement.read("phone")?,
                telegram_chat_id: statement.read("telegram_chat_id")?,
            }))
        } else {
            Ok(None)
        }
    }
}
