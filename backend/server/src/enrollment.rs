//! # Enrollments
//!
//! Links students to courses and tracks per-course progress.
//!
//! Each link is one [`Enrollment`] row. Enrolling, unenrolling, and cascading deletes all write
//! that single row through the store, so a student's course list and a course's roster always
//! agree. Removing a student from a course therefore also drops the course from the student.
//!
//! The store refuses an enrollment for a student or course that no longer exists, in the same
//! atomic step that writes it, so a delete racing an enroll cannot leave a dangling row.
//! Views still resolve references at read time and skip anything missing with a warning.
use std::{collections::HashMap, sync::Arc};

use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    error::AppError::{self, AlreadyEnrolled, NotFound},
    models::{
        Course, CourseSummary, CourseView, Enrollment, EnrollmentView, Progress, Student,
        StudentContact, StudentView,
    },
    store::{EnrollOutcome, Store},
};

#[derive(Clone)]
pub struct EnrollmentManager {
    store: Arc<dyn Store>,
}

impl EnrollmentManager {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    async fn require_student(&self, student_id: Uuid) -> Result<Student, AppError> {
        self.store
            .student(student_id)
            .await?
            .ok_or(NotFound("Student"))
    }

    pub async fn require_course(&self, course_id: Uuid) -> Result<Course, AppError> {
        self.store
            .course(course_id)
            .await?
            .ok_or(NotFound("Course"))
    }

    pub async fn enroll(&self, student_id: Uuid, course_id: Uuid) -> Result<StudentView, AppError> {
        let student = self.require_student(student_id).await?;

        let enrollment = Enrollment::new(student_id, course_id);
        match self.store.insert_enrollment(&enrollment).await? {
            EnrollOutcome::Inserted => {}
            EnrollOutcome::AlreadyEnrolled => {
                debug!("Student {student_id} already enrolled in course {course_id}");
                return Err(AlreadyEnrolled);
            }
            EnrollOutcome::StudentMissing => return Err(NotFound("Student")),
            EnrollOutcome::CourseMissing => return Err(NotFound("Course")),
        }

        info!("Enrolled student {student_id} in course {course_id}");
        self.student_view(student).await
    }

    pub async fn set_progress(
        &self,
        student_id: Uuid,
        course_id: Uuid,
        progress: Progress,
    ) -> Result<StudentView, AppError> {
        let student = self.require_student(student_id).await?;

        if !self
            .store
            .set_progress(student_id, course_id, progress)
            .await?
        {
            return Err(NotFound("Course for this student"));
        }

        info!(
            "Progress for student {student_id} in course {course_id} set to {}",
            progress.value()
        );
        self.student_view(student).await
    }

    pub async fn remove_student_from_course(
        &self,
        course_id: Uuid,
        student_id: Uuid,
    ) -> Result<(), AppError> {
        self.require_course(course_id).await?;

        if self.store.remove_enrollment(student_id, course_id).await? {
            info!("Removed student {student_id} from course {course_id}");
        } else {
            debug!("Student {student_id} was not enrolled in course {course_id}");
        }

        Ok(())
    }

    pub async fn list_enrolled_students(
        &self,
        course_id: Uuid,
    ) -> Result<Vec<StudentContact>, AppError> {
        self.require_course(course_id).await?;

        let mut contacts = Vec::new();
        for enrollment in self.store.course_enrollments(course_id).await? {
            match self.store.student(enrollment.student_id).await? {
                Some(student) => contacts.push(StudentContact::from(student)),
                None => warn!(
                    "Course {course_id} lists missing student {}",
                    enrollment.student_id
                ),
            }
        }

        Ok(contacts)
    }

    pub async fn list_students_with_courses(&self) -> Result<Vec<StudentView>, AppError> {
        let courses = self.course_index().await?;

        let mut views = Vec::new();
        for student in self.store.students().await? {
            let enrollments = self.store.student_enrollments(student.id).await?;
            views.push(resolve(student, enrollments, &courses));
        }

        Ok(views)
    }

    pub async fn student(&self, student_id: Uuid) -> Result<StudentView, AppError> {
        let student = self.require_student(student_id).await?;
        self.student_view(student).await
    }

    pub async fn student_view(&self, student: Student) -> Result<StudentView, AppError> {
        let enrollments = self.store.student_enrollments(student.id).await?;

        let mut courses = HashMap::new();
        for enrollment in &enrollments {
            if let Some(course) = self.store.course(enrollment.course_id).await? {
                courses.insert(course.id, course);
            }
        }

        Ok(resolve(student, enrollments, &courses))
    }

    pub async fn course(&self, course_id: Uuid) -> Result<CourseView, AppError> {
        let course = self.require_course(course_id).await?;
        self.course_view(course).await
    }

    pub async fn course_view(&self, course: Course) -> Result<CourseView, AppError> {
        let students_enrolled = self
            .store
            .course_enrollments(course.id)
            .await?
            .into_iter()
            .map(|enrollment| enrollment.student_id)
            .collect();

        Ok(CourseView {
            id: course.id,
            name: course.name,
            description: course.description,
            students_enrolled,
            created_at: course.created_at,
        })
    }

    pub async fn list_courses(&self) -> Result<Vec<CourseView>, AppError> {
        let mut views = Vec::new();
        for course in self.store.courses().await? {
            views.push(self.course_view(course).await?);
        }

        Ok(views)
    }

    async fn course_index(&self) -> Result<HashMap<Uuid, Course>, AppError> {
        Ok(self
            .store
            .courses()
            .await?
            .into_iter()
            .map(|course| (course.id, course))
            .collect())
    }
}

fn resolve(
    student: Student,
    enrollments: Vec<Enrollment>,
    courses: &HashMap<Uuid, Course>,
) -> StudentView {
    let enrollments = enrollments
        .into_iter()
        .filter_map(|enrollment| match courses.get(&enrollment.course_id) {
            Some(course) => Some(EnrollmentView {
                course: CourseSummary::from(course),
                progress: enrollment.progress,
            }),
            None => {
                warn!(
                    "Student {} lists missing course {}",
                    student.id, enrollment.course_id
                );
                None
            }
        })
        .collect();

    StudentView {
        id: student.id,
        name: student.name,
        email: student.email,
        enrollments,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryStore;

    struct Fixture {
        manager: EnrollmentManager,
        store: Arc<MemoryStore>,
        ada: Student,
        algorithms: Course,
    }

    fn progress(value: i64) -> Progress {
        Progress::try_from(value).unwrap()
    }

    async fn fixture() -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let manager = EnrollmentManager::new(store.clone());

        let ada = Student::new("Ada".to_string(), "ada@x.com".to_string());
        let algorithms = Course::new("Algorithms".to_string(), None);
        store.insert_student(&ada).await.unwrap();
        store.insert_course(&algorithms).await.unwrap();

        Fixture {
            manager,
            store,
            ada,
            algorithms,
        }
    }

    #[tokio::test]
    async fn test_enroll_links_both_sides() {
        let f = fixture().await;

        let view = f.manager.enroll(f.ada.id, f.algorithms.id).await.unwrap();

        assert_eq!(view.enrollments.len(), 1);
        assert_eq!(view.enrollments[0].course.id, f.algorithms.id);
        assert_eq!(view.enrollments[0].course.name, "Algorithms");
        assert_eq!(view.progress_in(f.algorithms.id), Some(Progress::default()));

        let course = f.manager.course(f.algorithms.id).await.unwrap();
        assert_eq!(course.students_enrolled, vec![f.ada.id]);
    }

    #[tokio::test]
    async fn test_second_enroll_fails_without_change() {
        let f = fixture().await;
        f.manager.enroll(f.ada.id, f.algorithms.id).await.unwrap();
        f.manager
            .set_progress(f.ada.id, f.algorithms.id, progress(30))
            .await
            .unwrap();

        let result = f.manager.enroll(f.ada.id, f.algorithms.id).await;
        assert!(matches!(result, Err(AlreadyEnrolled)));

        let view = f.manager.student(f.ada.id).await.unwrap();
        assert_eq!(view.enrollments.len(), 1);
        assert_eq!(view.progress_in(f.algorithms.id).unwrap().value(), 30);
        assert_eq!(f.store.enrollment_count(), 1);
    }

    #[tokio::test]
    async fn test_enroll_missing_course() {
        let f = fixture().await;

        let result = f.manager.enroll(f.ada.id, Uuid::new_v4()).await;

        assert!(matches!(result, Err(NotFound("Course"))));
        assert!(f.manager.student(f.ada.id).await.unwrap().enrollments.is_empty());
    }

    #[tokio::test]
    async fn test_enroll_missing_student() {
        let f = fixture().await;

        let result = f.manager.enroll(Uuid::new_v4(), f.algorithms.id).await;

        assert!(matches!(result, Err(NotFound("Student"))));
        assert!(f.manager.course(f.algorithms.id).await.unwrap().students_enrolled.is_empty());
    }

    #[tokio::test]
    async fn test_progress_overwrites() {
        let f = fixture().await;
        f.manager.enroll(f.ada.id, f.algorithms.id).await.unwrap();

        f.manager
            .set_progress(f.ada.id, f.algorithms.id, progress(50))
            .await
            .unwrap();
        let view = f
            .manager
            .set_progress(f.ada.id, f.algorithms.id, progress(75))
            .await
            .unwrap();

        assert_eq!(view.progress_in(f.algorithms.id).unwrap().value(), 75);
    }

    #[tokio::test]
    async fn test_progress_bounds_reachable() {
        let f = fixture().await;
        f.manager.enroll(f.ada.id, f.algorithms.id).await.unwrap();

        for value in [0, 100] {
            let view = f
                .manager
                .set_progress(f.ada.id, f.algorithms.id, progress(value))
                .await
                .unwrap();
            assert_eq!(i64::from(view.progress_in(f.algorithms.id).unwrap().value()), value);
        }
    }

    #[tokio::test]
    async fn test_progress_requires_enrollment() {
        let f = fixture().await;

        let unknown_student = f
            .manager
            .set_progress(Uuid::new_v4(), f.algorithms.id, progress(10))
            .await;
        assert!(matches!(unknown_student, Err(NotFound("Student"))));

        let not_enrolled = f
            .manager
            .set_progress(f.ada.id, f.algorithms.id, progress(10))
            .await;
        assert!(matches!(not_enrolled, Err(NotFound(_))));
    }

    #[tokio::test]
    async fn test_list_enrolled_students() {
        let f = fixture().await;
        f.manager.enroll(f.ada.id, f.algorithms.id).await.unwrap();

        let students = f.manager.list_enrolled_students(f.algorithms.id).await.unwrap();

        assert_eq!(students.len(), 1);
        assert_eq!(students[0].name, "Ada");
        assert_eq!(students[0].email, "ada@x.com");

        let missing = f.manager.list_enrolled_students(Uuid::new_v4()).await;
        assert!(matches!(missing, Err(NotFound("Course"))));
    }

    #[tokio::test]
    async fn test_remove_student_unlinks_both_sides() {
        let f = fixture().await;
        f.manager.enroll(f.ada.id, f.algorithms.id).await.unwrap();

        f.manager
            .remove_student_from_course(f.algorithms.id, f.ada.id)
            .await
            .unwrap();

        assert!(f.manager.list_enrolled_students(f.algorithms.id).await.unwrap().is_empty());
        // the student's own record loses the course as well
        assert!(f.manager.student(f.ada.id).await.unwrap().enrollments.is_empty());

        // and can enroll again afterwards
        f.manager.enroll(f.ada.id, f.algorithms.id).await.unwrap();
    }

    #[tokio::test]
    async fn test_remove_student_missing_course() {
        let f = fixture().await;

        let result = f
            .manager
            .remove_student_from_course(Uuid::new_v4(), f.ada.id)
            .await;

        assert!(matches!(result, Err(NotFound("Course"))));
    }

    #[tokio::test]
    async fn test_list_students_with_courses() {
        let f = fixture().await;
        let graphs = Course::new("Graphs".to_string(), Some("BFS, DFS".to_string()));
        let grace = Student::new("Grace".to_string(), "grace@x.com".to_string());
        f.store.insert_course(&graphs).await.unwrap();
        f.store.insert_student(&grace).await.unwrap();

        f.manager.enroll(f.ada.id, f.algorithms.id).await.unwrap();
        f.manager.enroll(f.ada.id, graphs.id).await.unwrap();

        let views = f.manager.list_students_with_courses().await.unwrap();
        assert_eq!(views.len(), 2);

        let ada = views.iter().find(|view| view.id == f.ada.id).unwrap();
        let names: Vec<&str> = ada
            .enrollments
            .iter()
            .map(|enrollment| enrollment.course.name.as_str())
            .collect();
        assert_eq!(names, vec!["Algorithms", "Graphs"]);
        assert_eq!(ada.enrollments[1].course.description.as_deref(), Some("BFS, DFS"));

        let grace = views.iter().find(|view| view.id == grace.id).unwrap();
        assert!(grace.enrollments.is_empty());
    }

    #[tokio::test]
    async fn test_deleted_course_drops_from_student() {
        let f = fixture().await;
        f.manager.enroll(f.ada.id, f.algorithms.id).await.unwrap();

        f.store.delete_course(f.algorithms.id).await.unwrap();

        assert!(f.manager.student(f.ada.id).await.unwrap().enrollments.is_empty());
    }

    #[tokio::test]
    async fn test_enroll_after_student_deleted() {
        let f = fixture().await;
        f.store.delete_student(f.ada.id).await.unwrap();

        // the row is gone before the insert, so nothing may be written for it
        let outcome = f
            .store
            .insert_enrollment(&Enrollment::new(f.ada.id, f.algorithms.id))
            .await
            .unwrap();
        assert_eq!(outcome, EnrollOutcome::StudentMissing);

        let course = f.manager.course(f.algorithms.id).await.unwrap();
        assert!(course.students_enrolled.is_empty());
        assert_eq!(f.store.enrollment_count(), 0);
    }

    #[tokio::test]
    async fn test_enroll_after_course_deleted() {
        let f = fixture().await;
        f.store.delete_course(f.algorithms.id).await.unwrap();

        let result = f.manager.enroll(f.ada.id, f.algorithms.id).await;

        assert!(matches!(result, Err(NotFound("Course"))));
        assert_eq!(f.store.enrollment_count(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_enrolls_write_once() {
        let f = fixture().await;

        let attempts: Vec<_> = (0..16)
            .map(|_| {
                let manager = f.manager.clone();
                let (student_id, course_id) = (f.ada.id, f.algorithms.id);
                tokio::spawn(async move { manager.enroll(student_id, course_id).await })
            })
            .collect();

        let mut enrolled = 0;
        let mut rejected = 0;
        for attempt in attempts {
            match attempt.await.unwrap() {
                Ok(_) => enrolled += 1,
                Err(AlreadyEnrolled) => rejected += 1,
                Err(other) => panic!("unexpected error: {other}"),
            }
        }

        assert_eq!(enrolled, 1);
        assert_eq!(rejected, 15);
        assert_eq!(f.store.enrollment_count(), 1);
        assert_eq!(
            f.manager.course(f.algorithms.id).await.unwrap().students_enrolled,
            vec![f.ada.id]
        );
    }
}
