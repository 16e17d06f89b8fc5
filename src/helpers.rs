use chrono::{DateTime, Utc};
use colored::Colorize;
use once_cell::sync::Lazy;
use std::sync::{Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

pub static SUCCESS: Lazy<colored::ColoredString> = Lazy::new(|| "[FLEET]".green());
pub static FAIL: Lazy<colored::ColoredString> = Lazy::new(|| "[FLEET]".red());
pub static WARN: Lazy<colored::ColoredString> = Lazy::new(|| "[FLEET]".yellow());

// Poisoning only means another thread panicked mid-update; the guarded maps stay structurally valid.
pub fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> { mutex.lock().unwrap_or_else(PoisonError::into_inner) }

pub fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> { lock.read().unwrap_or_else(PoisonError::into_inner) }

pub fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> { lock.write().unwrap_or_else(PoisonError::into_inner) }

pub fn format_duration(datetime: DateTime<Utc>) -> String {
    let current_time = Utc::now();
    let duration = current_time.signed_duration_since(datetime);

    match duration.num_seconds() {
        s if s >= 86400 => format!("{}d", s / 86400),
        s if s >= 3600 => format!("{}h", s / 3600),
        s if s >= 60 => format!("{}m", s / 60),
        s => format!("{}s", s),
    }
}
