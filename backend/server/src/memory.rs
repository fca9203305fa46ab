//! In-process [`Store`] used by tests and by `STORAGE_BACKEND=memory`.
//!
//! Every table sits behind one lock, so each call is atomic with respect to every other call.
use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::RwLock;
use uuid::Uuid;

use crate::{
    models::{Course, Enrollment, Progress, Student},
    store::{EnrollOutcome, Store, StoreError, StoreResult},
};

#[derive(Debug, Default)]
struct Tables {
    students: HashMap<Uuid, Student>,
    student_order: Vec<Uuid>,
    emails: HashMap<String, Uuid>,

    courses: HashMap<Uuid, Course>,
    course_order: Vec<Uuid>,

    enrollments: HashMap<(Uuid, Uuid), Enrollment>,
    // insertion ordered
    by_student: HashMap<Uuid, Vec<Uuid>>,
    by_course: HashMap<Uuid, Vec<Uuid>>,
}

impl Tables {
    fn claim_email(&mut self, email: &str, owner: Uuid) -> StoreResult<()> {
        if self.emails.get(email).is_some_and(|existing| *existing != owner) {
            return Err(StoreError::DuplicateEmail(email.to_string()));
        }

        self.emails.insert(email.to_string(), owner);
        Ok(())
    }

    fn unlink(&mut self, student_id: Uuid, course_id: Uuid) -> bool {
        if self.enrollments.remove(&(student_id, course_id)).is_none() {
            return false;
        }

        if let Some(courses) = self.by_student.get_mut(&student_id) {
            courses.retain(|id| *id != course_id);
        }
        if let Some(students) = self.by_course.get_mut(&course_id) {
            students.retain(|id| *id != student_id);
        }

        true
    }
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enrollment_count(&self) -> usize {
        self.tables.read().enrollments.len()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn insert_student(&self, student: &Student) -> StoreResult<()> {
        let mut tables = self.tables.write();

        tables.claim_email(&student.email, student.id)?;
        if tables.students.insert(student.id, student.clone()).is_none() {
            tables.student_order.push(student.id);
        }

        Ok(())
    }

    async fn student(&self, id: Uuid) -> StoreResult<Option<Student>> {
        Ok(self.tables.read().students.get(&id).cloned())
    }

    async fn students(&self) -> StoreResult<Vec<Student>> {
        let tables = self.tables.read();

        Ok(tables
            .student_order
            .iter()
            .filter_map(|id| tables.students.get(id).cloned())
            .collect())
    }

    async fn update_student(&self, student: &Student) -> StoreResult<bool> {
        let mut tables = self.tables.write();

        let Some(previous_email) = tables.students.get(&student.id).map(|s| s.email.clone()) else {
            return Ok(false);
        };

        tables.claim_email(&student.email, student.id)?;
        if previous_email != student.email {
            tables.emails.remove(&previous_email);
        }
        tables.students.insert(student.id, student.clone());

        Ok(true)
    }

    async fn delete_student(&self, id: Uuid) -> StoreResult<bool> {
        let mut tables = self.tables.write();

        let Some(student) = tables.students.remove(&id) else {
            return Ok(false);
        };

        tables.emails.remove(&student.email);
        tables.student_order.retain(|existing| *existing != id);

        for course_id in tables.by_student.remove(&id).unwrap_or_default() {
            tables.enrollments.remove(&(id, course_id));
            if let Some(students) = tables.by_course.get_mut(&course_id) {
                students.retain(|existing| *existing != id);
            }
        }

        Ok(true)
    }

    async fn insert_course(&self, course: &Course) -> StoreResult<()> {
        let mut tables = self.tables.write();

        if tables.courses.insert(course.id, course.clone()).is_none() {
            tables.course_order.push(course.id);
        }

        Ok(())
    }

    async fn course(&self, id: Uuid) -> StoreResult<Option<Course>> {
        Ok(self.tables.read().courses.get(&id).cloned())
    }

    async fn courses(&self) -> StoreResult<Vec<Course>> {
        let tables = self.tables.read();

        Ok(tables
            .course_order
            .iter()
            .filter_map(|id| tables.courses.get(id).cloned())
            .collect())
    }

    async fn update_course(&self, course: &Course) -> StoreResult<bool> {
        let mut tables = self.tables.write();

        match tables.courses.get_mut(&course.id) {
            Some(existing) => {
                *existing = course.clone();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn delete_course(&self, id: Uuid) -> StoreResult<bool> {
        let mut tables = self.tables.write();

        if tables.courses.remove(&id).is_none() {
            return Ok(false);
        }

        tables.course_order.retain(|existing| *existing != id);

        for student_id in tables.by_course.remove(&id).unwrap_or_default() {
            tables.enrollments.remove(&(student_id, id));
            if let Some(courses) = tables.by_student.get_mut(&student_id) {
                courses.retain(|existing| *existing != id);
            }
        }

        Ok(true)
    }

    async fn insert_enrollment(&self, enrollment: &Enrollment) -> StoreResult<EnrollOutcome> {
        let mut tables = self.tables.write();
        let key = (enrollment.student_id, enrollment.course_id);

        if !tables.students.contains_key(&enrollment.student_id) {
            return Ok(EnrollOutcome::StudentMissing);
        }
        if !tables.courses.contains_key(&enrollment.course_id) {
            return Ok(EnrollOutcome::CourseMissing);
        }
        if tables.enrollments.contains_key(&key) {
            return Ok(EnrollOutcome::AlreadyEnrolled);
        }

        tables.enrollments.insert(key, enrollment.clone());
        tables
            .by_student
            .entry(enrollment.student_id)
            .or_default()
            .push(enrollment.course_id);
        tables
            .by_course
            .entry(enrollment.course_id)
            .or_default()
            .push(enrollment.student_id);

        Ok(EnrollOutcome::Inserted)
    }

    async fn set_progress(
        &self,
        student_id: Uuid,
        course_id: Uuid,
        progress: Progress,
    ) -> StoreResult<bool> {
        let mut tables = self.tables.write();

        match tables.enrollments.get_mut(&(student_id, course_id)) {
            Some(enrollment) => {
                enrollment.progress = progress;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn remove_enrollment(&self, student_id: Uuid, course_id: Uuid) -> StoreResult<bool> {
        Ok(self.tables.write().unlink(student_id, course_id))
    }

    async fn student_enrollments(&self, student_id: Uuid) -> StoreResult<Vec<Enrollment>> {
        let tables = self.tables.read();

        Ok(tables
            .by_student
            .get(&student_id)
            .into_iter()
            .flatten()
            .filter_map(|course_id| tables.enrollments.get(&(student_id, *course_id)).cloned())
            .collect())
    }

    async fn course_enrollments(&self, course_id: Uuid) -> StoreResult<Vec<Enrollment>> {
        let tables = self.tables.read();

        Ok(tables
            .by_course
            .get(&course_id)
            .into_iter()
            .flatten()
            .filter_map(|student_id| tables.enrollments.get(&(*student_id, course_id)).cloned())
            .collect())
    }
}
