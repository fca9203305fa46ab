use anyhow::{Context, Result, bail, ensure};
use clap::Parser;
use reqwest::{Client, Response};
use serde_json::{Value, json};

#[derive(Parser, Debug)]
#[command(author, version, about = "Drives a running registrar through an enrollment round trip")]
struct Args {
    #[arg(long, env = "REGISTRAR_URL", default_value = "http://localhost:1111")]
    base_url: String,

    /// Leave the created student and course in place.
    #[arg(long)]
    keep: bool,
}

async fn read(response: Response, expected: u16) -> Result<Value> {
    let status = response.status();
    let body: Value = response.json().await.context("Response was not JSON")?;

    if status.as_u16() != expected {
        bail!("Expected {expected}, got {status}: {body}");
    }

    Ok(body)
}

fn id_of(body: &Value, field: &str) -> Result<String> {
    body[field]["id"]
        .as_str()
        .map(str::to_string)
        .with_context(|| format!("No {field}.id in {body}"))
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let client = Client::new();
    let url = |path: &str| format!("{}{path}", args.base_url.trim_end_matches('/'));

    let email = format!("ada+{}@x.com", std::process::id());
    let student = read(
        client
            .post(url("/students/add"))
            .json(&json!({ "name": "Ada", "email": email }))
            .send()
            .await?,
        201,
    )
    .await?;
    let student_id = id_of(&student, "student")?;
    println!("Student: {student_id}");

    let course = read(
        client
            .post(url("/courses/add"))
            .json(&json!({ "name": "Algorithms", "description": "Smoke test" }))
            .send()
            .await?,
        201,
    )
    .await?;
    let course_id = id_of(&course, "course")?;
    println!("Course: {course_id}");

    read(
        client
            .post(url(&format!("/students/enroll/{student_id}")))
            .json(&json!({ "courseId": course_id }))
            .send()
            .await?,
        200,
    )
    .await?;
    println!("Enrolled");

    read(
        client
            .post(url(&format!("/students/enroll/{student_id}")))
            .json(&json!({ "courseId": course_id }))
            .send()
            .await?,
        400,
    )
    .await?;
    println!("Duplicate enrollment rejected");

    let progressed = read(
        client
            .put(url("/students/progress"))
            .json(&json!({ "studentId": student_id, "courseId": course_id, "progress": 75 }))
            .send()
            .await?,
        200,
    )
    .await?;
    ensure!(
        progressed["student"]["enrollments"][0]["progress"] == 75,
        "Progress not applied: {progressed}"
    );
    println!("Progress set to 75");

    let roster = read(
        client
            .get(url(&format!("/courses/{course_id}/students")))
            .send()
            .await?,
        200,
    )
    .await?;
    ensure!(
        roster == json!([{ "id": student_id, "name": "Ada", "email": email }]),
        "Unexpected roster: {roster}"
    );
    println!("Roster: {roster}");

    if !args.keep {
        read(
            client
                .delete(url(&format!("/courses/delete/{course_id}")))
                .send()
                .await?,
            200,
        )
        .await?;
        read(
            client
                .delete(url(&format!("/students/delete/{student_id}")))
                .send()
                .await?,
            200,
        )
        .await?;
        println!("Cleaned up");
    }

    println!("All checks passed");
    Ok(())
}
