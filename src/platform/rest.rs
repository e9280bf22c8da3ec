//! Thin REST adapter for the management engine API.
//!
//! Deliberately mechanical: request, JSON in, domain types out. All
//! sequencing and failure semantics live in the orchestrator, which only
//! sees the [`PlatformGateway`] trait.

use super::{ExportRequest, PlatformGateway};
use crate::config::ApiSettings;
use crate::core::{
    BackupError, Disk, Result, Snapshot, SnapshotStatus, StorageDomain, Vm, VmStatus,
};
use async_trait::async_trait;
use reqwest::{Method, StatusCode};
use serde_json::Value;

pub struct RestGateway {
    http: reqwest::Client,
    base: String,
    user: String,
    password: String,
}

impl RestGateway {
    pub fn connect(api: &ApiSettings) -> Result<Self> {
        let mut builder = reqwest::Client::builder().user_agent(api.application_name.clone());

        if !api.ca_file.is_empty() {
            let pem = std::fs::read(&api.ca_file)?;
            let cert = reqwest::Certificate::from_pem(&pem)
                .map_err(|err| BackupError::Config(format!("invalid CA file: {}", err)))?;
            builder = builder.add_root_certificate(cert);
        }

        let http = builder
            .build()
            .map_err(|err| BackupError::Connection(err.to_string()))?;

        Ok(Self {
            http,
            base: api.url.trim_end_matches('/').to_string(),
            user: api.user.clone(),
            password: api.password.clone(),
        })
    }

    fn request(&self, method: Method, path: &str) -> reqwest::RequestBuilder {
        self.http
            .request(method, format!("{}{}", self.base, path))
            .basic_auth(&self.user, Some(&self.password))
            .header(reqwest::header::ACCEPT, "application/json")
    }

    async fn get_json(&self, path: &str) -> Result<Value> {
        let response = self.request(Method::GET, path).send().await?;
        let response = response.error_for_status().map_err(BackupError::from)?;
        Ok(response.json().await?)
    }

    async fn post_json(&self, path: &str, body: &Value) -> Result<Value> {
        let response = self.request(Method::POST, path).json(body).send().await?;
        let response = response.error_for_status().map_err(BackupError::from)?;
        Ok(response.json().await?)
    }

    async fn delete(&self, path: &str) -> Result<()> {
        let response = self.request(Method::DELETE, path).send().await?;
        response.error_for_status().map_err(BackupError::from)?;
        Ok(())
    }

    async fn search(&self, collection: &str, name: &str) -> Result<Value> {
        self.get_json(&format!("/{}?search=name%3D{}", collection, name))
            .await
    }

    async fn export_domain_id(&self, export_domain: &str) -> Result<String> {
        let domain = self
            .storage_domain_by_name(export_domain)
            .await?
            .ok_or_else(|| BackupError::StorageDomainNotFound(export_domain.to_string()))?;
        Ok(domain.id)
    }
}

// The engine wraps collections in a keyed object and encodes numbers as
// strings; these helpers absorb both.

fn items<'a>(value: &'a Value, key: &str) -> Vec<&'a Value> {
    match &value[key] {
        Value::Array(list) => list.iter().collect(),
        Value::Null => Vec::new(),
        single => vec![single],
    }
}

fn text(value: &Value, key: &str) -> String {
    value[key].as_str().unwrap_or_default().to_string()
}

fn number(value: &Value) -> u64 {
    value
        .as_u64()
        .or_else(|| value.as_str().and_then(|s| s.parse().ok()))
        .unwrap_or(0)
}

fn boolean(value: &Value) -> bool {
    value
        .as_bool()
        .or_else(|| value.as_str().and_then(|s| s.parse().ok()))
        .unwrap_or(false)
}

fn vm_from_json(value: &Value) -> Vm {
    Vm {
        id: text(value, "id"),
        name: text(value, "name"),
        status: VmStatus::parse(value["status"].as_str().unwrap_or_default()),
    }
}

fn snapshot_from_json(value: &Value) -> Snapshot {
    Snapshot {
        id: text(value, "id"),
        description: text(value, "description"),
        status: SnapshotStatus::parse(value["snapshot_status"].as_str().unwrap_or_default()),
        persist_memorystate: boolean(&value["persist_memorystate"]),
    }
}

fn domain_from_json(value: &Value) -> StorageDomain {
    StorageDomain {
        id: text(value, "id"),
        name: text(value, "name"),
        used: number(&value["used"]),
        available: number(&value["available"]),
        warning_low_space_percent: number(&value["warning_low_space_indicator"]),
    }
}

#[async_trait]
impl PlatformGateway for RestGateway {
    async fn test_connection(&self) -> Result<bool> {
        match self.request(Method::GET, "/").send().await {
            Ok(response) => Ok(response.status().is_success()),
            Err(_) => Ok(false),
        }
    }

    async fn cluster_exists(&self, name: &str) -> Result<bool> {
        let found = self.search("clusters", name).await?;
        Ok(!items(&found, "cluster").is_empty())
    }

    async fn storage_domain_by_name(&self, name: &str) -> Result<Option<StorageDomain>> {
        let found = self.search("storagedomains", name).await?;
        Ok(items(&found, "storage_domain")
            .first()
            .map(|sd| domain_from_json(sd)))
    }

    async fn vm_by_name(&self, name: &str) -> Result<Option<Vm>> {
        let found = self.search("vms", name).await?;
        Ok(items(&found, "vm").first().map(|vm| vm_from_json(vm)))
    }

    async fn vm_status(&self, vm_id: &str) -> Result<VmStatus> {
        let vm = self.get_json(&format!("/vms/{}", vm_id)).await?;
        Ok(VmStatus::parse(vm["status"].as_str().unwrap_or_default()))
    }

    async fn attached_disks(&self, vm_id: &str) -> Result<Vec<Disk>> {
        let found = self
            .get_json(&format!("/vms/{}/diskattachments?follow=disk", vm_id))
            .await?;
        Ok(items(&found, "disk_attachment")
            .iter()
            .map(|attachment| Disk {
                id: text(&attachment["disk"], "id"),
                actual_size: number(&attachment["disk"]["actual_size"]),
            })
            .collect())
    }

    async fn snapshots(&self, vm_id: &str) -> Result<Vec<Snapshot>> {
        let found = self.get_json(&format!("/vms/{}/snapshots", vm_id)).await?;
        Ok(items(&found, "snapshot")
            .iter()
            .map(|snap| snapshot_from_json(snap))
            .collect())
    }

    async fn snapshot(&self, vm_id: &str, snapshot_id: &str) -> Result<Option<Snapshot>> {
        let response = self
            .request(Method::GET, &format!("/vms/{}/snapshots/{}", vm_id, snapshot_id))
            .send()
            .await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }

        let response = response.error_for_status().map_err(BackupError::from)?;
        let snap: Value = response.json().await?;
        Ok(Some(snapshot_from_json(&snap)))
    }

    async fn snapshot_disks(&self, vm_id: &str, snapshot_id: &str) -> Result<Vec<Disk>> {
        let found = self
            .get_json(&format!("/vms/{}/snapshots/{}/disks", vm_id, snapshot_id))
            .await?;
        Ok(items(&found, "disk")
            .iter()
            .map(|disk| Disk {
                id: text(disk, "id"),
                actual_size: number(&disk["actual_size"]),
            })
            .collect())
    }

    async fn create_snapshot(
        &self,
        vm_id: &str,
        description: &str,
        persist_memorystate: bool,
    ) -> Result<Snapshot> {
        let body = serde_json::json!({
            "description": description,
            "persist_memorystate": persist_memorystate,
        });
        let snap = self
            .post_json(&format!("/vms/{}/snapshots", vm_id), &body)
            .await?;
        Ok(snapshot_from_json(&snap))
    }

    async fn delete_snapshot(&self, vm_id: &str, snapshot_id: &str) -> Result<()> {
        self.delete(&format!("/vms/{}/snapshots/{}", vm_id, snapshot_id))
            .await
    }

    async fn clone_vm_from_snapshot(
        &self,
        _vm_id: &str,
        snapshot_id: &str,
        clone_name: &str,
        cluster: &str,
    ) -> Result<Vm> {
        let body = serde_json::json!({
            "name": clone_name,
            "snapshots": { "snapshot": [ { "id": snapshot_id } ] },
            "cluster": { "name": cluster },
        });
        let vm = self.post_json("/vms", &body).await?;
        Ok(vm_from_json(&vm))
    }

    async fn export_vm(&self, vm_id: &str, request: &ExportRequest) -> Result<()> {
        let body = serde_json::json!({
            "exclusive": request.exclusive,
            "discard_snapshots": request.discard_snapshots,
            "storage_domain": { "name": request.storage_domain },
        });
        self.post_json(&format!("/vms/{}/export", vm_id), &body)
            .await?;
        Ok(())
    }

    async fn delete_vm(&self, vm_id: &str) -> Result<()> {
        self.delete(&format!("/vms/{}", vm_id)).await
    }

    async fn export_entries(&self, export_domain: &str) -> Result<Vec<Vm>> {
        let domain_id = self.export_domain_id(export_domain).await?;
        let found = self
            .get_json(&format!("/storagedomains/{}/vms", domain_id))
            .await?;
        Ok(items(&found, "vm").iter().map(|vm| vm_from_json(vm)).collect())
    }

    async fn delete_export_entry(&self, export_domain: &str, vm_id: &str) -> Result<()> {
        let domain_id = self.export_domain_id(export_domain).await?;
        self.delete(&format!("/storagedomains/{}/vms/{}", domain_id, vm_id))
            .await
    }

    async fn close(&self) -> Result<()> {
        // the HTTP session is stateless; nothing to release server-side
        Ok(())
    }
}
