//! # Records
//!
//! Stored rows and the views handed back to clients.
//!
//! The store keeps three kinds of rows:
//! - **Student**: name and a unique email
//! - **Course**: name, optional description, creation time
//! - **Enrollment**: the link between one student and one course, carrying progress
//!
//! Neither side of the relation owns a list of the other. A student's course list and a
//! course's roster are both read off the enrollment rows, so the two sides cannot drift apart.
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AppError;

pub const MAX_PROGRESS: u8 = 100;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Student {
    pub id: Uuid,
    pub name: String,
    pub email: String,
}

impl Student {
    pub fn new(name: String, email: String) -> Self {
        Self {
            id: Uuid::new_v4(),
            name,
            email,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Course {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Course {
    pub fn new(name: String, description: Option<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name,
            description,
            created_at: Utc::now(),
        }
    }
}

/// Completion percentage, always within `0..=100`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "u8")]
pub struct Progress(u8);

impl Progress {
    pub fn value(self) -> u8 {
        self.0
    }
}

impl TryFrom<i64> for Progress {
    type Error = AppError;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        if !(0..=i64::from(MAX_PROGRESS)).contains(&value) {
            return Err(AppError::InvalidArgument(format!(
                "Progress must be between 0 and {MAX_PROGRESS}, got {value}"
            )));
        }

        Ok(Self(value as u8))
    }
}

impl From<Progress> for u8 {
    fn from(progress: Progress) -> Self {
        progress.0
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Enrollment {
    pub student_id: Uuid,
    pub course_id: Uuid,
    pub progress: Progress,
    pub enrolled_at: DateTime<Utc>,
}

impl Enrollment {
    pub fn new(student_id: Uuid, course_id: Uuid) -> Self {
        Self {
            student_id,
            course_id,
            progress: Progress::default(),
            enrolled_at: Utc::now(),
        }
    }
}

// Views

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CourseSummary {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
}

impl From<&Course> for CourseSummary {
    fn from(course: &Course) -> Self {
        Self {
            id: course.id,
            name: course.name.clone(),
            description: course.description.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnrollmentView {
    pub course: CourseSummary,
    pub progress: Progress,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StudentView {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub enrollments: Vec<EnrollmentView>,
}

impl StudentView {
    pub fn progress_in(&self, course_id: Uuid) -> Option<Progress> {
        self.enrollments
            .iter()
            .find(|enrollment| enrollment.course.id == course_id)
            .map(|enrollment| enrollment.progress)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CourseView {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub students_enrolled: Vec<Uuid>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StudentContact {
    pub id: Uuid,
    pub name: String,
    pub email: String,
}

impl From<Student> for StudentContact {
    fn from(student: Student) -> Self {
        Self {
            id: student.id,
            name: student.name,
            email: student.email,
        }
    }
}

// Payloads

#[derive(Debug, Default, Deserialize)]
pub struct NewStudent {
    pub name: Option<String>,
    pub email: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct StudentUpdate {
    pub name: Option<String>,
    pub email: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct NewCourse {
    pub name: Option<String>,
    pub description: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct CourseUpdate {
    pub name: Option<String>,
    pub description: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnrollRequest {
    pub course_id: String,
}

/// `progress` stays a raw integer so out-of-range values reach validation instead of
/// failing deserialization.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressRequest {
    pub student_id: String,
    pub course_id: String,
    pub progress: i64,
}
