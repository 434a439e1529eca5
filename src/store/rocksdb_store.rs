use super::BookingStore;
use crate::{
    booked_count_key, booking_key, event_key, Booking, BookingError, Event, EventId, Result,
};
use async_trait::async_trait;
use rocksdb::{Options, WriteBatch, DB};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Mutex;

const BOOKING_SEQUENCE_KEY: &str = "seq#booking";

/// RocksDB-backed booking store.
///
/// A booking, the per-event booked counter and the id sequence are written in
/// one `WriteBatch` under `write_lock`, so the uniqueness check and the insert
/// cannot interleave with another insert in this process. RocksDB only allows
/// one process to open the database.
pub struct RocksDbStore {
    db: DB,
    write_lock: Mutex<()>,
}

impl RocksDbStore {
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.set_max_open_files(10000);
        opts.set_use_fsync(false);
        opts.set_bytes_per_sync(8388608);
        opts.optimize_for_point_lookup(1024);

        let db = DB::open(&opts, path)?;
        Ok(Self {
            db,
            write_lock: Mutex::new(()),
        })
    }

    pub fn open_in(state_dir: &str, name: &str) -> Result<Self> {
        let full_path = format!("{}/{}", state_dir, name);
        std::fs::create_dir_all(&full_path)?;
        Self::new(full_path)
    }

    pub fn get<T>(&self, key: &str) -> Result<Option<T>>
    where
        T: for<'de> Deserialize<'de>,
    {
        match self.db.get(key)? {
            Some(value) => {
                let deserialized: T = serde_json::from_slice(&value)?;
                Ok(Some(deserialized))
            }
            None => Ok(None),
        }
    }

    pub fn put<T>(&self, key: &str, value: &T) -> Result<()>
    where
        T: Serialize,
    {
        let serialized = serde_json::to_vec(value)?;
        self.db.put(key, serialized)?;
        Ok(())
    }

    pub fn contains_key(&self, key: &str) -> Result<bool> {
        Ok(self.db.get(key)?.is_some())
    }
}

#[async_trait]
impl BookingStore for RocksDbStore {
    async fn find_event(&self, event_id: EventId) -> Result<Option<Event>> {
        self.get(&event_key(event_id))
    }

    async fn find_booking(&self, event_id: EventId, user_id: &str) -> Result<Option<Booking>> {
        self.get(&booking_key(event_id, user_id))
    }

    async fn count_bookings(&self, event_id: EventId) -> Result<u64> {
        Ok(self.get::<u64>(&booked_count_key(event_id))?.unwrap_or(0))
    }

    async fn insert_booking(&self, event_id: EventId, user_id: &str) -> Result<Booking> {
        let _guard = self
            .write_lock
            .lock()
            .map_err(|_| BookingError::Store("booking write lock poisoned".to_string()))?;

        let key = booking_key(event_id, user_id);
        if self.contains_key(&key)? {
            return Err(BookingError::DuplicateBooking {
                event_id,
                user_id: user_id.to_string(),
            });
        }

        let booked = self.get::<u64>(&booked_count_key(event_id))?.unwrap_or(0);
        let id = self.get::<i64>(BOOKING_SEQUENCE_KEY)?.unwrap_or(0) + 1;
        let booking = Booking::new(id, event_id, user_id);

        let mut batch = WriteBatch::default();
        batch.put(key, serde_json::to_vec(&booking)?);
        batch.put(booked_count_key(event_id), serde_json::to_vec(&(booked + 1))?);
        batch.put(BOOKING_SEQUENCE_KEY, serde_json::to_vec(&id)?);
        self.db.write(batch)?;

        Ok(booking)
    }

    async fn upsert_event(&self, event: Event) -> Result<()> {
        self.put(&event_key(event.id), &event)
    }

    async fn flush(&self) -> Result<()> {
        self.db.flush()?;
        Ok(())
    }
}

impl Drop for RocksDbStore {
    fn drop(&mut self) {
        let _ = self.db.flush();
    }
}
