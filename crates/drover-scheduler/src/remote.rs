//! HTTP client for the worker fleet and worker token minting.

use async_trait::async_trait;
use chrono::Utc;
use drover_core::{Build, Error, ExecutorInfo, Result, Worker, WorkerClient};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::time::Duration;

type HmacSha256 = Hmac<Sha256>;

/// Mints short-lived tokens of the form `hostname.expiry.signature`.
#[derive(Clone)]
pub struct WorkerTokenMinter {
    secret: String,
    ttl: Duration,
}

impl WorkerTokenMinter {
    pub fn new(secret: impl Into<String>, ttl: Duration) -> Self {
        Self {
            secret: secret.into(),
            ttl,
        }
    }

    pub fn mint(&self, hostname: &str) -> Result<String> {
        let expiry = Utc::now().timestamp() + self.ttl.as_secs() as i64;
        let payload = format!("{}.{}", hostname, expiry);
        let signature = self.sign(&payload)?;
        Ok(format!("{}.{}", payload, signature))
    }

    /// Check a token and return the hostname it was minted for.
    pub fn validate(&self, token: &str) -> Result<String> {
        let invalid = || Error::Unauthorized("invalid worker token".to_string());

        let (payload, signature) = token.rsplit_once('.').ok_or_else(invalid)?;
        let (hostname, expiry) = payload.rsplit_once('.').ok_or_else(invalid)?;
        let expiry: i64 = expiry.parse().map_err(|_| invalid())?;

        let signature = hex::decode(signature).map_err(|_| invalid())?;
        let mut mac = self.mac()?;
        mac.update(payload.as_bytes());
        mac.verify_slice(&signature).map_err(|_| invalid())?;

        if expiry < Utc::now().timestamp() {
            return Err(Error::Unauthorized("worker token expired".to_string()));
        }
        Ok(hostname.to_string())
    }

    fn sign(&self, payload: &str) -> Result<String> {
        let mut mac = self.mac()?;
        mac.update(payload.as_bytes());
        Ok(hex::encode(mac.finalize().into_bytes()))
    }

    fn mac(&self) -> Result<HmacSha256> {
        HmacSha256::new_from_slice(self.secret.as_bytes())
            .map_err(|e| Error::Internal(format!("invalid worker auth secret: {}", e)))
    }
}

/// Talks to the worker API. One attempt per call, bounded by a timeout.
pub struct HttpWorkerClient {
    http: reqwest::Client,
    minter: WorkerTokenMinter,
}

impl HttpWorkerClient {
    pub fn new(minter: WorkerTokenMinter, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Internal(format!("unable to build worker client: {}", e)))?;
        Ok(Self { http, minter })
    }

    fn url(worker: &Worker, path: &str) -> String {
        format!("{}{}", worker.address.trim_end_matches('/'), path)
    }
}

fn request_error(worker: &Worker, err: reqwest::Error) -> Error {
    if err.is_timeout() {
        Error::Timeout(format!("worker {} did not respond: {}", worker.hostname, err))
    } else {
        Error::Worker(format!("request to worker {} failed: {}", worker.hostname, err))
    }
}

#[async_trait]
impl WorkerClient for HttpWorkerClient {
    async fn list_executors(&self, worker: &Worker) -> Result<Vec<ExecutorInfo>> {
        let token = self.minter.mint(&worker.hostname)?;
        self.http
            .get(Self::url(worker, "/api/v1/executors"))
            .bearer_auth(token)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| request_error(worker, e))?
            .json::<Vec<ExecutorInfo>>()
            .await
            .map_err(|e| request_error(worker, e))
    }

    async fn cancel_build(&self, worker: &Worker, executor_id: i64) -> Result<Build> {
        let token = self.minter.mint(&worker.hostname)?;
        let path = format!("/api/v1/executors/{}/build/cancel", executor_id);
        self.http
            .delete(Self::url(worker, &path))
            .bearer_auth(token)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| request_error(worker, e))?
            .json::<Build>()
            .await
            .map_err(|e| request_error(worker, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_round_trip() {
        let minter = WorkerTokenMinter::new("s3cret", Duration::from_secs(60));
        let token = minter.mint("worker-1.example.com").unwrap();

        assert_eq!(minter.validate(&token).unwrap(), "worker-1.example.com");
    }

    #[test]
    fn test_token_rejects_other_secret_and_tampering() {
        let minter = WorkerTokenMinter::new("s3cret", Duration::from_secs(60));
        let token = minter.mint("worker-1").unwrap();

        let other = WorkerTokenMinter::new("different", Duration::from_secs(60));
        assert!(matches!(other.validate(&token), Err(Error::Unauthorized(_))));

        let tampered = token.replacen("worker-1", "worker-2", 1);
        assert!(minter.validate(&tampered).is_err());
        assert!(minter.validate("garbage").is_err());
    }

    #[test]
    fn test_expired_token() {
        let minter = WorkerTokenMinter::new("s3cret", Duration::ZERO);
        let expiry = Utc::now().timestamp() - 10;
        let payload = format!("worker-1.{}", expiry);
        let token = format!("{}.{}", payload, minter.sign(&payload).unwrap());

        let err = minter.validate(&token).unwrap_err();
        assert!(err.to_string().contains("expired"));
    }

    #[test]
    fn test_url_joins_without_double_slash() {
        let worker = Worker {
            id: Default::default(),
            hostname: "w".to_string(),
            address: "http://w:8080/".to_string(),
            routes: Vec::new(),
            active: true,
            last_checked_in: None,
        };
        assert_eq!(
            HttpWorkerClient::url(&worker, "/api/v1/executors"),
            "http://w:8080/api/v1/executors"
        );
    }
}
