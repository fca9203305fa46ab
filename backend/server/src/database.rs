//! # Redis
//!
//! RAM database.
//!
//! Holds students, courses, and the enrollments linking them.
//!
//! ## Layout
//!
//! - `students`: hash, student id -> student JSON
//! - `students:email`: hash, email -> student id, the uniqueness index
//! - `courses`: hash, course id -> course JSON
//! - `enrollments:student:{id}`: hash, course id -> enrollment JSON (progress lives here)
//! - `enrollments:course:{id}`: set of student ids, the roster index
//!
//! ## Atomicity
//!
//! Anything touching more than one key runs as a Lua script. Redis executes a script
//! as one step, so an enrollment is either on both indexes or on neither, two
//! concurrent enroll calls for the same pair cannot both win, and an enrollment is
//! never written for a student or course deleted a moment earlier.
//!
//! Scripts touch keys derived from ids they read, so this layout assumes a single
//! node, not Redis Cluster.
use std::time::Duration;

use async_trait::async_trait;
use redis::{
    AsyncCommands, Client, RedisError, Script,
    aio::{ConnectionManager, ConnectionManagerConfig},
};
use serde::{Serialize, de::DeserializeOwned};
use tracing::{debug, info};
use uuid::Uuid;

use crate::{
    models::{Course, Enrollment, Progress, Student},
    store::{EnrollOutcome, Store, StoreError, StoreResult},
};

pub const STUDENTS_KEY: &str = "students";
pub const EMAILS_KEY: &str = "students:email";
pub const COURSES_KEY: &str = "courses";
pub const STUDENT_ENROLLMENTS_PREFIX: &str = "enrollments:student:";
pub const COURSE_ROSTER_PREFIX: &str = "enrollments:course:";

const INSERT_MODE: &str = "insert";
const UPDATE_MODE: &str = "update";

// KEYS: students, emails
// ARGV: id, email, json, mode
// -1 missing (update mode), 0 email taken, 1 written
const PUT_STUDENT: &str = r#"
local previous = redis.call('HGET', KEYS[1], ARGV[1])
if ARGV[4] == 'update' and not previous then return -1 end
local owner = redis.call('HGET', KEYS[2], ARGV[2])
if owner and owner ~= ARGV[1] then return 0 end
if previous then
    local old_email = cjson.decode(previous)['email']
    if old_email ~= ARGV[2] then redis.call('HDEL', KEYS[2], old_email) end
end
redis.call('HSET', KEYS[2], ARGV[2], ARGV[1])
redis.call('HSET', KEYS[1], ARGV[1], ARGV[3])
return 1
"#;

// KEYS: students, emails, student enrollments
// ARGV: id, roster prefix
const DELETE_STUDENT: &str = r#"
local raw = redis.call('HGET', KEYS[1], ARGV[1])
if not raw then return 0 end
redis.call('HDEL', KEYS[2], cjson.decode(raw)['email'])
redis.call('HDEL', KEYS[1], ARGV[1])
for _, course_id in ipairs(redis.call('HKEYS', KEYS[3])) do
    redis.call('SREM', ARGV[2] .. course_id, ARGV[1])
end
redis.call('DEL', KEYS[3])
return 1
"#;

// KEYS: courses
// ARGV: id, json
const REPLACE_COURSE: &str = r#"
if redis.call('HEXISTS', KEYS[1], ARGV[1]) == 0 then return 0 end
redis.call('HSET', KEYS[1], ARGV[1], ARGV[2])
return 1
"#;

// KEYS: courses, course roster
// ARGV: id, student enrollments prefix
const DELETE_COURSE: &str = r#"
if redis.call('HDEL', KEYS[1], ARGV[1]) == 0 then return 0 end
for _, student_id in ipairs(redis.call('SMEMBERS', KEYS[2])) do
    redis.call('HDEL', ARGV[2] .. student_id, ARGV[1])
end
redis.call('DEL', KEYS[2])
return 1
"#;

// KEYS: students, courses, student enrollments, course roster
// ARGV: course id, student id, json
// -2 student missing, -1 course missing, 0 already enrolled, 1 written
const ENROLL: &str = r#"
if redis.call('HEXISTS', KEYS[1], ARGV[2]) == 0 then return -2 end
if redis.call('HEXISTS', KEYS[2], ARGV[1]) == 0 then return -1 end
if redis.call('HSETNX', KEYS[3], ARGV[1], ARGV[3]) == 0 then return 0 end
redis.call('SADD', KEYS[4], ARGV[2])
return 1
"#;

// KEYS: student enrollments
// ARGV: course id, progress
const SET_PROGRESS: &str = r#"
local raw = redis.call('HGET', KEYS[1], ARGV[1])
if not raw then return 0 end
local enrollment = cjson.decode(raw)
enrollment['progress'] = tonumber(ARGV[2])
redis.call('HSET', KEYS[1], ARGV[1], cjson.encode(enrollment))
return 1
"#;

// KEYS: student enrollments, course roster
// ARGV: course id, student id
const UNENROLL: &str = r#"
local removed = redis.call('HDEL', KEYS[1], ARGV[1])
redis.call('SREM', KEYS[2], ARGV[2])
return removed
"#;

pub async fn init_redis(redis_url: &str) -> Result<ConnectionManager, RedisError> {
    let config = ConnectionManagerConfig::new()
        .set_number_of_retries(1)
        .set_connection_timeout(Duration::from_millis(100));

    let client = Client::open(redis_url)?;
    let connection_manager = client.get_connection_manager_with_config(config).await?;

    info!("Connected to Redis at {redis_url}");
    Ok(connection_manager)
}

fn student_enrollments_key(student_id: Uuid) -> String {
    format!("{STUDENT_ENROLLMENTS_PREFIX}{student_id}")
}

fn course_roster_key(course_id: Uuid) -> String {
    format!("{COURSE_ROSTER_PREFIX}{course_id}")
}

fn encode<T: Serialize>(value: &T) -> StoreResult<String> {
    Ok(serde_json::to_string(value)?)
}

fn decode<T: DeserializeOwned>(raw: &str) -> StoreResult<T> {
    Ok(serde_json::from_str(raw)?)
}

fn decode_all<T: DeserializeOwned>(rows: Vec<String>) -> StoreResult<Vec<T>> {
    rows.iter().map(|raw| decode(raw)).collect()
}

pub struct RedisStore {
    connection: ConnectionManager,
    put_student: Script,
    delete_student: Script,
    replace_course: Script,
    delete_course: Script,
    enroll: Script,
    set_progress: Script,
    unenroll: Script,
}

impl RedisStore {
    pub fn new(connection: ConnectionManager) -> Self {
        Self {
            connection,
            put_student: Script::new(PUT_STUDENT),
            delete_student: Script::new(DELETE_STUDENT),
            replace_course: Script::new(REPLACE_COURSE),
            delete_course: Script::new(DELETE_COURSE),
            enroll: Script::new(ENROLL),
            set_progress: Script::new(SET_PROGRESS),
            unenroll: Script::new(UNENROLL),
        }
    }

    pub async fn connect(redis_url: &str) -> Result<Self, RedisError> {
        Ok(Self::new(init_redis(redis_url).await?))
    }

    async fn write_student(&self, student: &Student, mode: &str) -> StoreResult<i64> {
        let mut connection = self.connection.clone();

        Ok(self
            .put_student
            .key(STUDENTS_KEY)
            .key(EMAILS_KEY)
            .arg(student.id.to_string())
            .arg(&student.email)
            .arg(encode(student)?)
            .arg(mode)
            .invoke_async(&mut connection)
            .await?)
    }
}

#[async_trait]
impl Store for RedisStore {
    async fn insert_student(&self, student: &Student) -> StoreResult<()> {
        match self.write_student(student, INSERT_MODE).await? {
            0 => Err(StoreError::DuplicateEmail(student.email.clone())),
            _ => Ok(()),
        }
    }

    async fn student(&self, id: Uuid) -> StoreResult<Option<Student>> {
        let mut connection = self.connection.clone();
        let raw: Option<String> = connection.hget(STUDENTS_KEY, id.to_string()).await?;

        raw.as_deref().map(decode).transpose()
    }

    async fn students(&self) -> StoreResult<Vec<Student>> {
        let mut connection = self.connection.clone();
        let rows: Vec<String> = connection.hvals(STUDENTS_KEY).await?;

        debug!("Loaded {} students", rows.len());
        decode_all(rows)
    }

    async fn update_student(&self, student: &Student) -> StoreResult<bool> {
        match self.write_student(student, UPDATE_MODE).await? {
            -1 => Ok(false),
            0 => Err(StoreError::DuplicateEmail(student.email.clone())),
            _ => Ok(true),
        }
    }

    async fn delete_student(&self, id: Uuid) -> StoreResult<bool> {
        let mut connection = self.connection.clone();

        let deleted: i64 = self
            .delete_student
            .key(STUDENTS_KEY)
            .key(EMAILS_KEY)
            .key(student_enrollments_key(id))
            .arg(id.to_string())
            .arg(COURSE_ROSTER_PREFIX)
            .invoke_async(&mut connection)
            .await?;

        Ok(deleted == 1)
    }

    async fn insert_course(&self, course: &Course) -> StoreResult<()> {
        let mut connection = self.connection.clone();
        let _: () = connection
            .hset(COURSES_KEY, course.id.to_string(), encode(course)?)
            .await?;

        Ok(())
    }

    async fn course(&self, id: Uuid) -> StoreResult<Option<Course>> {
        let mut connection = self.connection.clone();
        let raw: Option<String> = connection.hget(COURSES_KEY, id.to_string()).await?;

        raw.as_deref().map(decode).transpose()
    }

    async fn courses(&self) -> StoreResult<Vec<Course>> {
        let mut connection = self.connection.clone();
        let rows: Vec<String> = connection.hvals(COURSES_KEY).await?;

        let mut courses: Vec<Course> = decode_all(rows)?;
        courses.sort_by_key(|course| course.created_at);

        Ok(courses)
    }

    async fn update_course(&self, course: &Course) -> StoreResult<bool> {
        let mut connection = self.connection.clone();

        let replaced: i64 = self
            .replace_course
            .key(COURSES_KEY)
            .arg(course.id.to_string())
            .arg(encode(course)?)
            .invoke_async(&mut connection)
            .await?;

        Ok(replaced == 1)
    }

    async fn delete_course(&self, id: Uuid) -> StoreResult<bool> {
        let mut connection = self.connection.clone();

        let deleted: i64 = self
            .delete_course
            .key(COURSES_KEY)
            .key(course_roster_key(id))
            .arg(id.to_string())
            .arg(STUDENT_ENROLLMENTS_PREFIX)
            .invoke_async(&mut connection)
            .await?;

        Ok(deleted == 1)
    }

    async fn insert_enrollment(&self, enrollment: &Enrollment) -> StoreResult<EnrollOutcome> {
        let mut connection = self.connection.clone();

        let outcome: i64 = self
            .enroll
            .key(STUDENTS_KEY)
            .key(COURSES_KEY)
            .key(student_enrollments_key(enrollment.student_id))
            .key(course_roster_key(enrollment.course_id))
            .arg(enrollment.course_id.to_string())
            .arg(enrollment.student_id.to_string())
            .arg(encode(enrollment)?)
            .invoke_async(&mut connection)
            .await?;

        Ok(match outcome {
            -2 => EnrollOutcome::StudentMissing,
            -1 => EnrollOutcome::CourseMissing,
            0 => EnrollOutcome::AlreadyEnrolled,
            _ => EnrollOutcome::Inserted,
        })
    }

    async fn set_progress(
        &self,
        student_id: Uuid,
        course_id: Uuid,
        progress: Progress,
    ) -> StoreResult<bool> {
        let mut connection = self.connection.clone();

        let updated: i64 = self
            .set_progress
            .key(student_enrollments_key(student_id))
            .arg(course_id.to_string())
            .arg(progress.value())
            .invoke_async(&mut connection)
            .await?;

        Ok(updated == 1)
    }

    async fn remove_enrollment(&self, student_id: Uuid, course_id: Uuid) -> StoreResult<bool> {
        let mut connection = self.connection.clone();

        let removed: i64 = self
            .unenroll
            .key(student_enrollments_key(student_id))
            .key(course_roster_key(course_id))
            .arg(course_id.to_string())
            .arg(student_id.to_string())
            .invoke_async(&mut connection)
            .await?;

        Ok(removed == 1)
    }

    async fn student_enrollments(&self, student_id: Uuid) -> StoreResult<Vec<Enrollment>> {
        let mut connection = self.connection.clone();
        let rows: Vec<String> = connection.hvals(student_enrollments_key(student_id)).await?;

        let mut enrollments: Vec<Enrollment> = decode_all(rows)?;
        enrollments.sort_by_key(|enrollment| enrollment.enrolled_at);

        Ok(enrollments)
    }

    async fn course_enrollments(&self, course_id: Uuid) -> StoreResult<Vec<Enrollment>> {
        let mut connection = self.connection.clone();
        let student_ids: Vec<String> = connection.smembers(course_roster_key(course_id)).await?;

        if student_ids.is_empty() {
            return Ok(Vec::new());
        }

        let mut pipe = redis::pipe();
        for student_id in &student_ids {
            pipe.hget(
                format!("{STUDENT_ENROLLMENTS_PREFIX}{student_id}"),
                course_id.to_string(),
            );
        }

        let rows: Vec<Option<String>> = pipe.query_async(&mut connection).await?;

        let mut enrollments: Vec<Enrollment> = decode_all(rows.into_iter().flatten().collect())?;
        enrollments.sort_by_key(|enrollment| enrollment.enrolled_at);

        Ok(enrollments)
    }
}

#[cfg(test)]
mod tests {
    //! Run against a disposable Redis:
    //! `REDIS_URL=redis://127.0.0.1:6379 cargo test -- --ignored`
    use std::{env, sync::Arc};

    use super::*;

    async fn store() -> RedisStore {
        let url = env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string());
        RedisStore::connect(&url).await.unwrap()
    }

    fn unique_student(name: &str) -> Student {
        Student::new(name.to_string(), format!("{}@test.local", Uuid::new_v4()))
    }

    #[test]
    fn test_key_layout() {
        let id = Uuid::nil();
        assert_eq!(
            student_enrollments_key(id),
            "enrollments:student:00000000-0000-0000-0000-000000000000"
        );
        assert_eq!(
            course_roster_key(id),
            "enrollments:course:00000000-0000-0000-0000-000000000000"
        );
    }

    #[tokio::test]
    #[ignore = "requires a running redis"]
    async fn test_enroll_is_single_shot() {
        let store = store().await;
        let student = unique_student("Ada");
        let course = Course::new("Algorithms".to_string(), None);
        store.insert_student(&student).await.unwrap();
        store.insert_course(&course).await.unwrap();

        let enrollment = Enrollment::new(student.id, course.id);
        assert_eq!(
            store.insert_enrollment(&enrollment).await.unwrap(),
            EnrollOutcome::Inserted
        );
        assert_eq!(
            store.insert_enrollment(&enrollment).await.unwrap(),
            EnrollOutcome::AlreadyEnrolled
        );

        let roster = store.course_enrollments(course.id).await.unwrap();
        assert_eq!(roster.len(), 1);
        assert_eq!(roster[0].student_id, student.id);

        store.delete_course(course.id).await.unwrap();
        store.delete_student(student.id).await.unwrap();
    }

    #[tokio::test]
    #[ignore = "requires a running redis"]
    async fn test_progress_survives_script_round_trip() {
        let store = store().await;
        let student = unique_student("Grace");
        let course = Course::new("Compilers".to_string(), None);
        store.insert_student(&student).await.unwrap();
        store.insert_course(&course).await.unwrap();
        store
            .insert_enrollment(&Enrollment::new(student.id, course.id))
            .await
            .unwrap();

        let progress = Progress::try_from(75_i64).unwrap();
        assert!(store.set_progress(student.id, course.id, progress).await.unwrap());

        let enrollments = store.student_enrollments(student.id).await.unwrap();
        assert_eq!(enrollments[0].progress, progress);

        store.delete_student(student.id).await.unwrap();
        assert!(store.course_enrollments(course.id).await.unwrap().is_empty());
        store.delete_course(course.id).await.unwrap();
    }

    #[tokio::test]
    #[ignore = "requires a running redis"]
    async fn test_duplicate_email_rejected() {
        let store = store().await;
        let student = unique_student("Ada");
        store.insert_student(&student).await.unwrap();

        let twin = Student::new("Twin".to_string(), student.email.clone());
        assert!(matches!(
            store.insert_student(&twin).await,
            Err(StoreError::DuplicateEmail(_))
        ));

        store.delete_student(student.id).await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    #[ignore = "requires a running redis"]
    async fn test_concurrent_enrolls_write_once() {
        let store = Arc::new(store().await);
        let student = unique_student("Ada");
        let course = Course::new("Algorithms".to_string(), None);
        store.insert_student(&student).await.unwrap();
        store.insert_course(&course).await.unwrap();

        let attempts: Vec<_> = (0..16)
            .map(|_| {
                let store = Arc::clone(&store);
                let enrollment = Enrollment::new(student.id, course.id);
                tokio::spawn(async move { store.insert_enrollment(&enrollment).await.unwrap() })
            })
            .collect();

        let mut outcomes = Vec::new();
        for attempt in attempts {
            outcomes.push(attempt.await.unwrap());
        }

        let inserted = outcomes
            .iter()
            .filter(|outcome| **outcome == EnrollOutcome::Inserted)
            .count();
        assert_eq!(inserted, 1);
        assert!(outcomes.iter().all(|outcome| matches!(
            outcome,
            EnrollOutcome::Inserted | EnrollOutcome::AlreadyEnrolled
        )));
        assert_eq!(store.course_enrollments(course.id).await.unwrap().len(), 1);
        assert_eq!(store.student_enrollments(student.id).await.unwrap().len(), 1);

        store.delete_course(course.id).await.unwrap();
        store.delete_student(student.id).await.unwrap();
    }

    #[tokio::test]
    #[ignore = "requires a running redis"]
    async fn test_enroll_after_delete_writes_nothing() {
        let store = store().await;
        let student = unique_student("Ada");
        let course = Course::new("Algorithms".to_string(), None);
        store.insert_student(&student).await.unwrap();
        store.insert_course(&course).await.unwrap();
        store.delete_student(student.id).await.unwrap();

        let outcome = store
            .insert_enrollment(&Enrollment::new(student.id, course.id))
            .await
            .unwrap();

        assert_eq!(outcome, EnrollOutcome::StudentMissing);
        assert!(store.course_enrollments(course.id).await.unwrap().is_empty());
        assert!(store.student_enrollments(student.id).await.unwrap().is_empty());

        store.delete_course(course.id).await.unwrap();
    }
}
