use anyhow::{bail, Context};
use reqwest::header::ACCEPT;
use serde_json::Value;
use crate::backend::DataClient;
use crate::query::{Filter, Query};
use crate::supabase::SupabaseClient;
use crate::check_response;

/// Makes the endpoint answer with a bare object instead of an array
const SINGLE_OBJECT: &str = "application/vnd.pgrst.object+json";

impl DataClient for SupabaseClient {

    fn select(&self, query: &Query) -> anyhow::Result<Vec<Value>> {
        let mut request = self.client.get(&["rest", "v1", query.table.as_str()])
            .query(&query.to_params());
        if query.single {
            request = request.header(ACCEPT, SINGLE_OBJECT);
        }
        let response = check_response(request.send()?)?;
        let body: Value = response.json()
            .with_context(|| format!("Could not parse rows of {}", query.table))?;
        match body {
            Value::Array(rows) => Ok(rows),
            row @ Value::Object(_) if query.single => Ok(vec![row]),
            other => bail!("Expected rows from {}, got: {}", query.table, other),
        }
    }

    fn insert(&self, table: &str, rows: Value) -> anyhow::Result<Vec<Value>> {
        let response = self.client.post(&["rest", "v1", table])
            .header("Prefer", "return=representation")
            .json(&rows)
            .send()?;
        let response = check_response(response)?;
        response.json()
            .with_context(|| format!("Could not parse rows inserted into {}", table))
    }

    fn update(&self, table: &str, filters: &[Filter], patch: Value) -> anyhow::Result<()> {
        // Without a filter every row of the table would be updated
        if filters.is_empty() {
            bail!("Refusing to update {} without a filter", table);
        }
        let params: Vec<_> = filters.iter().map(Filter::to_param).collect();
        let response = self.client.patch(&["rest", "v1", table])
            .query(&params)
            .header("Prefer", "return=minimal")
            .json(&patch)
            .send()?;
        check_response(response)?;
        Ok(())
    }

}
