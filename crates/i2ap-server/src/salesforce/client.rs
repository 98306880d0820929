//! Salesforce REST client
//!
//! Authenticates with the partner SOAP `login` call (username plus password
//! with the security token appended), then uses the session id as a bearer
//! token against the REST API. The session is cached and renewed once when
//! Salesforce rejects it.

use async_trait::async_trait;
use quick_xml::events::Event;
use quick_xml::Reader;
use regex::Regex;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::Value;
use std::sync::LazyLock;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info, instrument};

use super::{SalesforceApi, SalesforceError, SalesforceResult, SfField};
use crate::config::SalesforceSettings;
use crate::warehouse::DataFrame;

/// Login host for production orgs
pub const PRODUCTION_LOGIN_URL: &str = "https://login.salesforce.com";

/// Login host for sandboxes
pub const SANDBOX_LOGIN_URL: &str = "https://test.salesforce.com";

/// Default request timeout in seconds
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 300;

#[derive(Debug, Clone)]
struct Session {
    session_id: String,
    instance_url: String,
}

pub struct SalesforceClient {
    http: Client,
    settings: SalesforceSettings,
    session: RwLock<Option<Session>>,
}

#[derive(Deserialize)]
struct DescribeResponse {
    fields: Vec<SfField>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct QueryPage {
    #[serde(default)]
    records: Vec<serde_json::Map<String, Value>>,
    #[serde(default)]
    next_records_url: Option<String>,
}

impl SalesforceClient {
    pub fn new(settings: SalesforceSettings) -> SalesforceResult<Self> {
        if !settings.is_configured() {
            return Err(SalesforceError::NotConfigured);
        }
        let http = Client::builder()
            .timeout(Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS))
            .build()?;
        Ok(Self {
            http,
            settings,
            session: RwLock::new(None),
        })
    }

    fn login_url(&self) -> String {
        let base = match &self.settings.login_url {
            Some(url) => url.trim_end_matches('/').to_string(),
            None if self.settings.sandbox => SANDBOX_LOGIN_URL.to_string(),
            None => PRODUCTION_LOGIN_URL.to_string(),
        };
        format!("{}/services/Soap/u/{}", base, self.settings.api_version)
    }

    fn login_envelope(&self) -> String {
        let password = format!("{}{}", self.settings.password, self.settings.token);
        format!(
            r#"<?xml version="1.0" encoding="utf-8" ?>
<env:Envelope xmlns:xsd="http://www.w3.org/2001/XMLSchema"
    xmlns:xsi="http://www.w3.org/2001/XMLSchema-instance"
    xmlns:env="http://schemas.xmlsoap.org/soap/envelope/"
    xmlns:urn="urn:partner.soap.sforce.com">
  <env:Header><urn:CallOptions><urn:client>i2ap</urn:client></urn:CallOptions></env:Header>
  <env:Body>
    <n1:login xmlns:n1="urn:partner.soap.sforce.com">
      <n1:username>{}</n1:username>
      <n1:password>{}</n1:password>
    </n1:login>
  </env:Body>
</env:Envelope>"#,
            quick_xml::escape::escape(self.settings.user.as_str()),
            quick_xml::escape::escape(password.as_str())
        )
    }

    #[instrument(skip(self), fields(user = %self.settings.user))]
    async fn login(&self) -> SalesforceResult<Session> {
        let response = self
            .http
            .post(self.login_url())
            .header("Content-Type", "text/xml; charset=UTF-8")
            .header("SOAPAction", "login")
            .body(self.login_envelope())
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        let fields = soap_fields(&body)?;

        if !status.is_success() {
            let fault = fields
                .fault
                .unwrap_or_else(|| format!("login returned {}", status));
            return Err(SalesforceError::Login(fault));
        }

        match (fields.session_id, fields.server_url) {
            (Some(session_id), Some(server_url)) => {
                let instance_url = instance_url(&server_url);
                info!(instance = %instance_url, "Authenticated against Salesforce");
                Ok(Session {
                    session_id,
                    instance_url,
                })
            },
            _ => Err(SalesforceError::Login(
                fields
                    .fault
                    .unwrap_or_else(|| "response had no session".to_string()),
            )),
        }
    }

    async fn session(&self) -> SalesforceResult<Session> {
        if let Some(session) = self.session.read().await.clone() {
            return Ok(session);
        }
        let mut slot = self.session.write().await;
        if let Some(session) = slot.clone() {
            return Ok(session);
        }
        let session = self.login().await?;
        *slot = Some(session.clone());
        Ok(session)
    }

    /// GET a REST path (relative to the instance), renewing the session once
    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, &str)],
    ) -> SalesforceResult<T> {
        let mut renewed = false;
        loop {
            let session = self.session().await?;
            let url = format!("{}{}", session.instance_url, path);
            debug!(url = %url, "Salesforce request");

            let response = self
                .http
                .get(&url)
                .bearer_auth(&session.session_id)
                .query(query)
                .send()
                .await?;

            let status = response.status();
            if status == StatusCode::UNAUTHORIZED && !renewed {
                *self.session.write().await = None;
                renewed = true;
                continue;
            }
            if !status.is_success() {
                let message = response.text().await.unwrap_or_default();
                return Err(SalesforceError::Api {
                    status: status.as_u16(),
                    message: api_error_message(&message),
                });
            }
            return Ok(response.json().await?);
        }
    }

    fn data_path(&self, rest: &str) -> String {
        format!("/services/data/v{}/{}", self.settings.api_version, rest)
    }
}

#[async_trait]
impl SalesforceApi for SalesforceClient {
    #[instrument(skip(self))]
    async fn describe(&self, object: &str) -> SalesforceResult<Vec<SfField>> {
        let path = self.data_path(&format!("sobjects/{}/describe", object));
        let described: DescribeResponse = self.get_json(&path, &[]).await?;
        debug!(fields = described.fields.len(), "Described object");
        Ok(described.fields)
    }

    #[instrument(skip(self))]
    async fn query(&self, soql: &str) -> SalesforceResult<DataFrame> {
        let mut page: QueryPage = self.get_json(&self.data_path("query"), &[("q", soql)]).await?;

        let columns = match select_columns(soql) {
            Some(columns) => columns,
            None => page
                .records
                .first()
                .map(|r| r.keys().filter(|k| *k != "attributes").cloned().collect())
                .unwrap_or_default(),
        };

        let mut frame = DataFrame::new(columns);
        loop {
            for record in &page.records {
                let row = frame
                    .columns
                    .iter()
                    .map(|column| record_value(record, column))
                    .collect();
                frame.push_row(row)?;
            }
            match page.next_records_url.take() {
                Some(next) => page = self.get_json(&next, &[]).await?,
                None => break,
            }
        }

        info!(rows = frame.len(), "Salesforce query finished");
        Ok(frame)
    }
}

#[derive(Debug, Default)]
struct SoapFields {
    session_id: Option<String>,
    server_url: Option<String>,
    fault: Option<String>,
}

fn soap_fields(xml: &str) -> SalesforceResult<SoapFields> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut fields = SoapFields::default();
    let mut current: Option<String> = None;
    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                current = Some(String::from_utf8_lossy(e.local_name().as_ref()).into_owned());
            },
            Ok(Event::Text(text)) => {
                let value = text
                    .unescape()
                    .map_err(|e| SalesforceError::Response(e.to_string()))?
                    .into_owned();
                match current.as_deref() {
                    Some("sessionId") => fields.session_id = Some(value),
                    Some("serverUrl") => fields.server_url = Some(value),
                    Some("faultstring") => fields.fault = Some(value),
                    _ => {},
                }
            },
            Ok(Event::End(_)) => current = None,
            Ok(Event::Eof) => break,
            Err(e) => return Err(SalesforceError::Response(e.to_string())),
            _ => {},
        }
    }
    Ok(fields)
}

/// `https://na1.salesforce.com/services/Soap/u/58.0/00D...` -> `https://na1.salesforce.com`
fn instance_url(server_url: &str) -> String {
    match server_url.find("/services/") {
        Some(idx) => server_url[..idx].to_string(),
        None => server_url.trim_end_matches('/').to_string(),
    }
}

static SELECT_LIST: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"(?is)^\s*select\s+(.+?)\s+from\s").ok());

/// Field list of a `SELECT a, b FROM x` statement
fn select_columns(soql: &str) -> Option<Vec<String>> {
    let list = SELECT_LIST.as_ref()?.captures(soql)?.get(1)?.as_str();
    let columns: Vec<String> = list
        .split(',')
        .map(|c| c.trim().to_string())
        .filter(|c| !c.is_empty())
        .collect();
    if columns.iter().any(|c| c.contains('(')) {
        return None;
    }
    Some(columns)
}

/// Record values are matched case-insensitively and rendered as text
fn record_value(record: &serde_json::Map<String, Value>, column: &str) -> Option<String> {
    let value = record
        .get(column)
        .or_else(|| {
            record
                .iter()
                .find(|(k, _)| k.eq_ignore_ascii_case(column))
                .map(|(_, v)| v)
        })?;
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Number(n) => Some(n.to_string()),
        other => Some(other.to_string()),
    }
}

/// REST errors arrive as `[{"message":..,"errorCode":..}]`
fn api_error_message(body: &str) -> String {
    serde_json::from_str::<Vec<Value>>(body)
        .ok()
        .and_then(|errors| {
            errors
                .first()
                .and_then(|e| e.get("message"))
                .and_then(Value::as_str)
                .map(str::to_string)
        })
        .unwrap_or_else(|| body.to_string())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_soap_login_response() {
        let xml = r#"<?xml version="1.0" encoding="UTF-8"?>
<soapenv:Envelope xmlns:soapenv="http://schemas.xmlsoap.org/soap/envelope/">
  <soapenv:Body><loginResponse><result>
    <serverUrl>https://na1.salesforce.com/services/Soap/u/58.0/00D</serverUrl>
    <sessionId>00D!AQ&amp;x</sessionId>
  </result></loginResponse></soapenv:Body>
</soapenv:Envelope>"#;
        let fields = soap_fields(xml).unwrap();
        assert_eq!(fields.session_id.as_deref(), Some("00D!AQ&x"));
        assert_eq!(
            instance_url(fields.server_url.as_deref().unwrap()),
            "https://na1.salesforce.com"
        );
    }

    #[test]
    fn test_soap_fault() {
        let xml = r#"<soapenv:Envelope xmlns:soapenv="http://schemas.xmlsoap.org/soap/envelope/">
  <soapenv:Body><soapenv:Fault><faultcode>INVALID_LOGIN</faultcode>
  <faultstring>INVALID_LOGIN: Invalid username, password, security token; or user locked out.</faultstring>
  </soapenv:Fault></soapenv:Body></soapenv:Envelope>"#;
        let fields = soap_fields(xml).unwrap();
        assert!(fields.session_id.is_none());
        assert!(fields.fault.unwrap().starts_with("INVALID_LOGIN"));
    }

    #[test]
    fn test_select_columns() {
        assert_eq!(
            select_columns("SELECT Id, Name FROM Account WHERE x > 1").unwrap(),
            vec!["Id", "Name"]
        );
        assert!(select_columns("select count() from Account").is_none());
        assert!(select_columns("DESCRIBE Account").is_none());
    }

    #[test]
    fn test_select_list_pattern_compiles_once() {
        assert!(SELECT_LIST.is_some());
        let first = SELECT_LIST.as_ref().unwrap() as *const Regex;
        select_columns("SELECT Id\nFROM Account").unwrap();
        assert_eq!(SELECT_LIST.as_ref().unwrap() as *const Regex, first);
    }

    #[test]
    fn test_record_values_render_as_text() {
        let record: serde_json::Map<String, Value> = serde_json::from_str(
            r#"{"attributes":{"type":"Account"},"Id":"001","Amount":12.5,"IsDeleted":false,"Owner":null}"#,
        )
        .unwrap();
        assert_eq!(record_value(&record, "id").as_deref(), Some("001"));
        assert_eq!(record_value(&record, "Amount").as_deref(), Some("12.5"));
        assert_eq!(record_value(&record, "isdeleted").as_deref(), Some("false"));
        assert_eq!(record_value(&record, "Owner"), None);
        assert_eq!(record_value(&record, "Missing"), None);
    }

    #[test]
    fn test_api_error_message() {
        assert_eq!(
            api_error_message(r#"[{"message":"sObject type 'Foo' is not supported.","errorCode":"INVALID_TYPE"}]"#),
            "sObject type 'Foo' is not supported."
        );
        assert_eq!(api_error_message("gateway down"), "gateway down");
    }

    #[test]
    fn test_unconfigured_client_is_rejected() {
        let settings = SalesforceSettings {
            user: String::new(),
            password: String::new(),
            token: String::new(),
            sandbox: false,
            api_version: "58.0".into(),
            login_url: None,
        };
        assert!(matches!(
            SalesforceClient::new(settings),
            Err(SalesforceError::NotConfigured)
        ));
    }
}
