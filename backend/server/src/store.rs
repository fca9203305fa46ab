//! # Store
//!
//! Persistence seam for students, courses, and the enrollments between them.
//!
//! Handlers never reach a connection directly. [`State`](crate::state::AppState) owns an
//! `Arc<dyn Store>` and hands it to whoever needs it, so tests run on [`MemoryStore`] and
//! production runs on [`RedisStore`] without either knowing the difference.
//!
//! ## Contract
//!
//! - `insert_student`/`update_student` reject an email already owned by another student
//! - `insert_enrollment` checks that both rows exist and that the pair is new, then inserts,
//!   all in one atomic step
//! - `delete_student`/`delete_course` cascade to every enrollment touching the row
//! - enrollment listings come back in enrollment order
//!
//! [`MemoryStore`]: crate::memory::MemoryStore
//! [`RedisStore`]: crate::database::RedisStore
use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

use crate::models::{Course, Enrollment, Progress, Student};

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Email {0} is already registered")]
    DuplicateEmail(String),

    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Corrupt record: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// What [`Store::insert_enrollment`] did. Only `Inserted` writes anything.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnrollOutcome {
    Inserted,
    AlreadyEnrolled,
    StudentMissing,
    CourseMissing,
}

#[async_trait]
pub trait Store: Send + Sync {
    async fn insert_student(&self, student: &Student) -> StoreResult<()>;

    async fn student(&self, id: Uuid) -> StoreResult<Option<Student>>;

    async fn students(&self) -> StoreResult<Vec<Student>>;

    /// Returns `false` when no student with that id exists.
    async fn update_student(&self, student: &Student) -> StoreResult<bool>;

    async fn delete_student(&self, id: Uuid) -> StoreResult<bool>;

    async fn insert_course(&self, course: &Course) -> StoreResult<()>;

    async fn course(&self, id: Uuid) -> StoreResult<Option<Course>>;

    async fn courses(&self) -> StoreResult<Vec<Course>>;

    /// Returns `false` when no course with that id exists.
    async fn update_course(&self, course: &Course) -> StoreResult<bool>;

    async fn delete_course(&self, id: Uuid) -> StoreResult<bool>;

    async fn insert_enrollment(&self, enrollment: &Enrollment) -> StoreResult<EnrollOutcome>;

    /// Returns `false` when the pair is not enrolled.
    async fn set_progress(
        &self,
        student_id: Uuid,
        course_id: Uuid,
        progress: Progress,
    ) -> StoreResult<bool>;

    async fn remove_enrollment(&self, student_id: Uuid, course_id: Uuid) -> StoreResult<bool>;

    async fn student_enrollments(&self, student_id: Uuid) -> StoreResult<Vec<Enrollment>>;

    async fn course_enrollments(&self, course_id: Uuid) -> StoreResult<Vec<Enrollment>>;
}
