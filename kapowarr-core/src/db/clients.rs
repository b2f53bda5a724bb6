//! Storage of external download clients and source credentials.

use kapowarr_model::{
    ClientId, CredentialData, CredentialId, DownloadSource, DownloadType,
    ExternalClientData,
};
use sqlx::sqlite::{SqlitePool, SqliteRow};
use sqlx::Row;

use crate::error::{KapowarrError, Result};

fn client_from_row(row: &SqliteRow) -> Result<ExternalClientData> {
    let download_type: String = row.get("download_type");
    let download_type = match download_type.as_str() {
        "direct" => DownloadType::Direct,
        "torrent" => DownloadType::Torrent,
        other => {
            return Err(KapowarrError::Internal(format!(
                "unknown download type: {other}"
            )));
        }
    };
    Ok(ExternalClientData {
        id: ClientId(row.get("id")),
        client_type: row.get("client_type"),
        download_type,
        title: row.get("title"),
        base_url: row.get("base_url"),
        username: row.get("username"),
        password: row.get("password"),
        api_token: row.get("api_token"),
    })
}

#[derive(Debug, Clone)]
pub struct ClientsRepository {
    pool: SqlitePool,
}

impl ClientsRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn fetch_all(&self) -> Result<Vec<ExternalClientData>> {
        let rows = sqlx::query(
            r"
            SELECT id, client_type, download_type, title, base_url,
                   username, password, api_token
            FROM external_clients
            ORDER BY title;
            ",
        )
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(client_from_row).collect()
    }

    pub async fn fetch_one(&self, id: ClientId) -> Result<ExternalClientData> {
        let row = sqlx::query(
            r"
            SELECT id, client_type, download_type, title, base_url,
                   username, password, api_token
            FROM external_clients
            WHERE id = ?;
            ",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(KapowarrError::ExternalClientNotFound(id))?;
        client_from_row(&row)
    }

    pub async fn add(
        &self,
        client_type: &str,
        download_type: DownloadType,
        title: &str,
        base_url: &str,
        username: Option<&str>,
        password: Option<&str>,
        api_token: Option<&str>,
    ) -> Result<ClientId> {
        let download_type = match download_type {
            DownloadType::Direct => "direct",
            DownloadType::Torrent => "torrent",
        };
        let result = sqlx::query(
            r"
            INSERT INTO external_clients(
                client_type, download_type, title, base_url,
                username, password, api_token
            ) VALUES (?, ?, ?, ?, ?, ?, ?);
            ",
        )
        .bind(client_type)
        .bind(download_type)
        .bind(title)
        .bind(base_url)
        .bind(username)
        .bind(password)
        .bind(api_token)
        .execute(&self.pool)
        .await?;
        Ok(ClientId(result.last_insert_rowid()))
    }

    pub async fn update(&self, client: &ExternalClientData) -> Result<()> {
        let result = sqlx::query(
            r"
            UPDATE external_clients SET
                title = ?, base_url = ?, username = ?, password = ?,
                api_token = ?
            WHERE id = ?;
            ",
        )
        .bind(&client.title)
        .bind(&client.base_url)
        .bind(&client.username)
        .bind(&client.password)
        .bind(&client.api_token)
        .bind(client.id)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(KapowarrError::ExternalClientNotFound(client.id));
        }
        Ok(())
    }

    pub async fn delete(&self, id: ClientId) -> Result<()> {
        let result =
            sqlx::query("DELETE FROM external_clients WHERE id = ?;")
                .bind(id)
                .execute(&self.pool)
                .await?;
        if result.rows_affected() == 0 {
            return Err(KapowarrError::ExternalClientNotFound(id));
        }
        Ok(())
    }

    pub async fn fetch_credentials(&self) -> Result<Vec<CredentialData>> {
        let rows = sqlx::query(
            r"
            SELECT id, source, username, email, password, api_key
            FROM credentials;
            ",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .iter()
            .map(|row| CredentialData {
                id: CredentialId(row.get("id")),
                source: DownloadSource(row.get("source")),
                username: row.get("username"),
                email: row.get("email"),
                password: row.get("password"),
                api_key: row.get("api_key"),
            })
            .collect())
    }

    pub async fn fetch_credential(
        &self,
        id: CredentialId,
    ) -> Result<CredentialData> {
        let row = sqlx::query(
            r"
            SELECT id, source, username, email, password, api_key
            FROM credentials
            WHERE id = ?;
            ",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(KapowarrError::CredentialNotFound(id))?;
        Ok(CredentialData {
            id: CredentialId(row.get("id")),
            source: DownloadSource(row.get("source")),
            username: row.get("username"),
            email: row.get("email"),
            password: row.get("password"),
            api_key: row.get("api_key"),
        })
    }

    pub async fn add_credential(
        &self,
        credential: &CredentialData,
    ) -> Result<CredentialId> {
        let result = sqlx::query(
            r"
            INSERT INTO credentials(source, username, email, password, api_key)
            VALUES (?, ?, ?, ?, ?);
            ",
        )
        .bind(&credential.source.0)
        .bind(&credential.username)
        .bind(&credential.email)
        .bind(&credential.password)
        .bind(&credential.api_key)
        .execute(&self.pool)
        .await?;
        Ok(CredentialId(result.last_insert_rowid()))
    }

    pub async fn delete_credential(&self, id: CredentialId) -> Result<()> {
        let result = sqlx::query("DELETE FROM credentials WHERE id = ?;")
            .bind(id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(KapowarrError::CredentialNotFound(id));
        }
        Ok(())
    }
}
