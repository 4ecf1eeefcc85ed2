//! Test helper utilities for E2E testing

use reqwest::multipart;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::sleep;
use uuid::Uuid;

use crate::fixtures::TestImageFixture;

/// Response from POST /upscale
#[derive(Debug, Serialize, Deserialize)]
pub struct UpscaleResponse {
    pub job_id: Uuid,
    pub status: String,
    pub input_file: String,
}

/// Response from GET /status/{job_id}
#[derive(Debug, Serialize, Deserialize)]
pub struct JobStatusResponse {
    pub job_id: Uuid,
    pub status: String,
    pub progress: Option<u8>,
    pub stage: Option<String>,
    pub output_location: Option<serde_json::Value>,
    pub output_size: Option<serde_json::Value>,
    pub error: Option<String>,
}

/// Response from GET /download/{job_id}
#[derive(Debug, Serialize, Deserialize)]
pub struct DownloadResponse {
    pub download_url: String,
}

/// Upload a fixture image to the upscale endpoint
pub async fn upload_image(
    client: &reqwest::Client,
    base_url: &str,
    fixture: &TestImageFixture,
    bearer: Option<&str>,
) -> Result<UpscaleResponse, Box<dyn std::error::Error>> {
    let form = multipart::Form::new().part(
        "file",
        multipart::Part::bytes(fixture.bytes())
            .file_name(fixture.filename.to_string())
            .mime_str(fixture.content_type())?,
    );

    let mut request = client.post(format!("{}/upscale", base_url)).multipart(form);
    if let Some(token) = bearer {
        request = request.bearer_auth(token);
    }
    let response = request.send().await?;

    let status = response.status();
    if !status.is_success() {
        let error_text = response.text().await?;
        return Err(format!("Upload failed with status {}: {}", status, error_text).into());
    }

    Ok(response.json::<UpscaleResponse>().await?)
}

/// Poll job status until completed or failed (with timeout)
pub async fn poll_job_status(
    client: &reqwest::Client,
    base_url: &str,
    job_id: Uuid,
    timeout_secs: u64,
) -> Result<JobStatusResponse, Box<dyn std::error::Error>> {
    let max_attempts = timeout_secs * 2; // Poll every 500ms

    for attempt in 0..max_attempts {
        let response = client
            .get(format!("{}/status/{}", base_url, job_id))
            .send()
            .await?;

        if !response.status().is_success() {
            let error_text = response.text().await?;
            return Err(format!("Status check failed: {}", error_text).into());
        }

        let status_response = response.json::<JobStatusResponse>().await?;

        match status_response.status.as_str() {
            "completed" | "failed" => return Ok(status_response),
            "queued" | "processing" => {
                if attempt % 10 == 0 && attempt > 0 {
                    println!(
                        "  ... still waiting (attempt {}/{}, progress {:?}, stage {:?})",
                        attempt, max_attempts, status_response.progress, status_response.stage
                    );
                }
                sleep(Duration::from_millis(500)).await;
            }
            _ => {
                return Err(format!("Unknown job status: {}", status_response.status).into());
            }
        }
    }

    Err(format!("Job did not complete within {} seconds", timeout_secs).into())
}

/// Wait for worker to process job (with timeout)
pub async fn wait_for_job_completion(
    client: &reqwest::Client,
    base_url: &str,
    job_id: Uuid,
) -> Result<JobStatusResponse, Box<dyn std::error::Error>> {
    poll_job_status(client, base_url, job_id, 200).await
}

/// Fetch the presigned URL for a job and download the result
pub async fn download_result(
    client: &reqwest::Client,
    base_url: &str,
    job_id: Uuid,
) -> Result<Vec<u8>, Box<dyn std::error::Error>> {
    let link = client
        .get(format!("{}/download/{}", base_url, job_id))
        .send()
        .await?
        .error_for_status()?
        .json::<DownloadResponse>()
        .await?;

    let bytes = client
        .get(&link.download_url)
        .send()
        .await?
        .error_for_status()?
        .bytes()
        .await?;
    Ok(bytes.to_vec())
}
