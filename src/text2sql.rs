//! Text-to-SQL generator client
//!
//! Upstream collaborator of the guard: turns a natural-language question
//! into candidate SQL via an OpenAI-compatible chat-completions endpoint.
//! The system prompt is rendered from the active [`GuardPolicy`] so the
//! generator is steered toward queries the guard will accept; the guard
//! still re-validates everything this client returns.

use crate::error::Text2SqlError;
use crate::policy::GuardPolicy;
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
const DEFAULT_MODEL: &str = "gpt-4o-mini";

/// Candidate SQL from the generator, with the model that produced it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneratedSql {
    pub sql: String,
    pub model: String,
}

pub struct Text2SqlClient {
    api_key: String,
    base_url: String,
    model: String,
}

impl Text2SqlClient {
    pub fn new(api_key: String, model: String) -> Self {
        Self {
            api_key,
            base_url: DEFAULT_BASE_URL.to_string(),
            model,
        }
    }

    /// Point the client at a non-default OpenAI-compatible endpoint.
    pub fn with_base_url(mut self, base_url: String) -> Self {
        self.base_url = base_url;
        self
    }

    /// Build a client from `OPENAI_API_KEY` and `OPENAI_MODEL_TEXT2SQL`
    /// (falling back to `OPENAI_MODEL`, then the built-in default),
    /// loading `.env` first if present.
    pub fn from_env() -> Result<Self, Text2SqlError> {
        dotenv::dotenv().ok();
        let api_key = std::env::var("OPENAI_API_KEY").map_err(|_| Text2SqlError::MissingApiKey)?;
        let model = std::env::var("OPENAI_MODEL_TEXT2SQL")
            .or_else(|_| std::env::var("OPENAI_MODEL"))
            .unwrap_or_else(|_| DEFAULT_MODEL.to_string());
        Ok(Self::new(api_key, model))
    }

    /// Render the generator's system prompt from the policy allowlists.
    pub fn system_prompt(policy: &GuardPolicy) -> String {
        let mut tables = String::new();
        for (i, table) in policy.allowed_tables.iter().sorted().enumerate() {
            tables.push_str(&format!("  {}) {}\n", i + 1, table));
        }

        let mut schemas = String::new();
        for table in policy.allowed_tables.iter().sorted() {
            match policy.columns_for(table) {
                Some(columns) => {
                    let columns = columns.iter().sorted().join(", ");
                    schemas.push_str(&format!("- {} columns: {}\n", table, columns));
                }
                None => schemas.push_str(&format!("- {} (no column restriction)\n", table)),
            }
        }

        format!(
            "You are a data engineer writing SQL that runs on DuckDB.\n\
             \n\
             Constraints:\n\
             - Write a single SELECT statement only.\n\
             - One statement, no semicolons.\n\
             - JOIN is not allowed.\n\
             - Only these tables are accessible:\n\
             {}\
             - Name the columns you need (avoid SELECT *).\n\
             - Keep the result small: always include a LIMIT of at most {}.\n\
             \n\
             Table schemas:\n\
             {}\
             \n\
             Output:\n\
             - Output the SQL only, as plain text, without a code fence.",
            tables, policy.default_limit, schemas
        )
    }

    /// Generate candidate SQL for a natural-language question.
    ///
    /// Strips a code fence once if the model emits one anyway; the guard
    /// performs its own fence handling and full validation downstream.
    pub async fn generate_sql(
        &self,
        question: &str,
        policy: &GuardPolicy,
    ) -> Result<GeneratedSql, Text2SqlError> {
        let prompt = Self::system_prompt(policy);
        debug!("text2sql question: {}", question.trim());

        let client = reqwest::Client::new();
        let body = serde_json::json!({
            "model": self.model,
            "temperature": 0.0,
            "messages": [
                {"role": "system", "content": prompt},
                {"role": "user", "content": question.trim()},
            ],
        });

        let response = client
            .post(format!("{}/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| Text2SqlError::Http(e.to_string()))?;

        let response_json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| Text2SqlError::Http(e.to_string()))?;

        let content = response_json["choices"][0]["message"]["content"]
            .as_str()
            .ok_or_else(|| Text2SqlError::BadResponse("no content in completion".to_string()))?;

        let sql = content
            .replace("```sql", "")
            .replace("```", "")
            .trim()
            .to_string();
        info!("text2sql generated candidate via {}", self.model);

        Ok(GeneratedSql {
            sql,
            model: self.model.clone(),
        })
    }
}
