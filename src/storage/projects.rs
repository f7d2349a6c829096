//! 项目、项目文档、向量记录与预置对话
use diesel::prelude::*;

use super::{model, schema, Agent, Error};

impl Agent {
    crud!(
        knowledge_project, id_project, Project, NewProject,
        create: create_project,
        find: find_project,
        update: update_project,
        list: list_projects,
        list_ids: list_project_ids,
        list_by_ids: list_projects_by_ids
    );

    /// 删除项目及其文档、向量与预置对话。返回被删除的文档，调用方负责清理文件。
    pub fn remove_project(&self, id: i32) -> Result<Vec<model::Document>, Error> {
        use schema::{knowledge_document, knowledge_embedding, knowledge_fine_tuning, knowledge_project};
        let conn = &mut self.conn()?;
        conn.transaction::<_, Error, _>(|conn| {
            let documents = knowledge_document::table
                .filter(knowledge_document::project_id.eq(id))
                .select(model::Document::as_select())
                .load(conn)?;
            diesel::delete(knowledge_document::table.filter(knowledge_document::project_id.eq(id)))
                .execute(conn)?;
            diesel::delete(
                knowledge_embedding::table.filter(knowledge_embedding::project_id.eq(id)),
            )
            .execute(conn)?;
            diesel::delete(
                knowledge_fine_tuning::table.filter(knowledge_fine_tuning::project_id.eq(id)),
            )
            .execute(conn)?;
            let count = diesel::delete(knowledge_project::table.find(id)).execute(conn)?;
            if count == 0 {
                return Err(Error::NotFound);
            }
            Ok(documents)
        })
    }

    crud!(
        knowledge_document, id_document, Document, NewDocument,
        create: create_document,
        find: find_document,
        update: update_document,
        list: list_documents,
        list_ids: list_document_ids,
        list_by_ids: list_documents_by_ids
    );

    pub fn list_documents_by_project(&self, project_id: i32) -> Result<Vec<model::Document>, Error> {
        use schema::knowledge_document::dsl;
        let conn = &mut self.conn()?;
        dsl::knowledge_document
            .filter(dsl::project_id.eq(project_id))
            .order(dsl::id_document.asc())
            .select(model::Document::as_select())
            .load(conn)
            .map_err(|e| Error::Database(e.to_string()))
    }

    pub fn set_document_embedded(&self, id: i32, embedded: bool) -> Result<(), Error> {
        use schema::knowledge_document::dsl;
        let conn = &mut self.conn()?;
        let count = diesel::update(dsl::knowledge_document.find(id))
            .set(dsl::is_embedding.eq(embedded))
            .execute(conn)
            .map_err(|e| Error::Database(e.to_string()))?;
        match count {
            0 => Err(Error::NotFound),
            _ => Ok(()),
        }
    }

    /// 删除文档及其向量记录，返回被删除的文档
    pub fn remove_document(&self, id: i32) -> Result<model::Document, Error> {
        use schema::{knowledge_document, knowledge_embedding};
        let conn = &mut self.conn()?;
        conn.transaction::<_, Error, _>(|conn| {
            let document: model::Document = diesel::delete(knowledge_document::table.find(id))
                .returning(model::Document::as_returning())
                .get_result(conn)?;
            diesel::delete(
                knowledge_embedding::table
                    .filter(knowledge_embedding::file_id.eq(&document.file_key))
                    .filter(knowledge_embedding::project_id.eq(document.project_id)),
            )
            .execute(conn)?;
            Ok(document)
        })
    }

    crud!(
        knowledge_embedding, id_embedding, Embedding, NewEmbedding,
        create: create_embedding,
        find: find_embedding,
        update: update_embedding,
        list: list_embeddings,
        list_ids: list_embedding_ids,
        list_by_ids: list_embeddings_by_ids,
        remove: remove_embedding
    );

    /// 批量写入向量记录
    pub fn create_embeddings(&self, items: &[model::NewEmbedding]) -> Result<usize, Error> {
        use schema::knowledge_embedding;
        if items.is_empty() {
            return Ok(0);
        }
        let conn = &mut self.conn()?;
        conn.transaction::<_, Error, _>(|conn| {
            let count = diesel::insert_into(knowledge_embedding::table)
                .values(items)
                .execute(conn)?;
            Ok(count)
        })
    }

    pub fn list_embeddings_by_file(&self, file_id: &str) -> Result<Vec<model::Embedding>, Error> {
        use schema::knowledge_embedding::dsl;
        let conn = &mut self.conn()?;
        dsl::knowledge_embedding
            .filter(dsl::file_id.eq(file_id))
            .order(dsl::id_embedding.asc())
            .select(model::Embedding::as_select())
            .load(conn)
            .map_err(|e| Error::Database(e.to_string()))
    }

    pub fn list_embeddings_by_project(
        &self,
        project_id: i32,
    ) -> Result<Vec<model::Embedding>, Error> {
        use schema::knowledge_embedding::dsl;
        let conn = &mut self.conn()?;
        dsl::knowledge_embedding
            .filter(dsl::project_id.eq(project_id))
            .order(dsl::id_embedding.asc())
            .select(model::Embedding::as_select())
            .load(conn)
            .map_err(|e| Error::Database(e.to_string()))
    }

    pub fn remove_embeddings_by_file(&self, file_id: &str) -> Result<usize, Error> {
        use schema::knowledge_embedding::dsl;
        let conn = &mut self.conn()?;
        diesel::delete(dsl::knowledge_embedding.filter(dsl::file_id.eq(file_id)))
            .execute(conn)
            .map_err(|e| Error::Database(e.to_string()))
    }

    crud!(
        knowledge_fine_tuning, id_fine_tuning, FineTuning, NewFineTuning,
        create: create_fine_tuning,
        find: find_fine_tuning,
        update: update_fine_tuning,
        list: list_fine_tunings,
        list_ids: list_fine_tuning_ids,
        list_by_ids: list_fine_tunings_by_ids,
        remove: remove_fine_tuning
    );

    /// 按顺序获取一段预置对话
    pub fn list_fine_tunings_by_conversation(
        &self,
        conversation_id: i32,
    ) -> Result<Vec<model::FineTuning>, Error> {
        use schema::knowledge_fine_tuning::dsl;
        let conn = &mut self.conn()?;
        dsl::knowledge_fine_tuning
            .filter(dsl::conversation_id.eq(conversation_id))
            .order((dsl::ordering.asc(), dsl::id_fine_tuning.asc()))
            .select(model::FineTuning::as_select())
            .load(conn)
            .map_err(|e| Error::Database(e.to_string()))
    }
}
