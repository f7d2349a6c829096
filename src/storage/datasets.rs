//! 数据集与数据集文件
use diesel::prelude::*;

use super::{model, schema, Agent, Error};

impl Agent {
    crud!(
        knowledge_dataset, id_dataset, Dataset, NewDataset,
        create: create_dataset,
        find: find_dataset,
        update: update_dataset,
        list: list_datasets,
        list_ids: list_dataset_ids,
        list_by_ids: list_datasets_by_ids
    );

    /// 删除数据集及其文件记录。返回被删除的文件记录，调用方负责清理文件与索引。
    pub fn remove_dataset(&self, id: i32) -> Result<Vec<model::DatasetFile>, Error> {
        use schema::{knowledge_dataset, knowledge_dataset_file};
        let conn = &mut self.conn()?;
        conn.transaction::<_, Error, _>(|conn| {
            let files = knowledge_dataset_file::table
                .filter(knowledge_dataset_file::dataset_id.eq(id))
                .select(model::DatasetFile::as_select())
                .load(conn)?;
            diesel::delete(
                knowledge_dataset_file::table.filter(knowledge_dataset_file::dataset_id.eq(id)),
            )
            .execute(conn)?;
            let count = diesel::delete(knowledge_dataset::table.find(id)).execute(conn)?;
            if count == 0 {
                return Err(Error::NotFound);
            }
            Ok(files)
        })
    }

    crud!(
        knowledge_dataset_file, id_dataset_files, DatasetFile, NewDatasetFile,
        create: create_dataset_file,
        find: find_dataset_file,
        update: update_dataset_file,
        list: list_dataset_files,
        list_ids: list_dataset_file_ids,
        list_by_ids: list_dataset_files_by_ids
    );

    pub fn list_dataset_files_by_dataset(
        &self,
        dataset_id: i32,
    ) -> Result<Vec<model::DatasetFile>, Error> {
        use schema::knowledge_dataset_file::dsl;
        let conn = &mut self.conn()?;
        dsl::knowledge_dataset_file
            .filter(dsl::dataset_id.eq(dataset_id))
            .order(dsl::id_dataset_files.asc())
            .select(model::DatasetFile::as_select())
            .load(conn)
            .map_err(|e| Error::Database(e.to_string()))
    }

    /// 删除一条文件记录并返回它
    pub fn remove_dataset_file(&self, id: i32) -> Result<model::DatasetFile, Error> {
        use schema::knowledge_dataset_file::dsl;
        let conn = &mut self.conn()?;
        diesel::delete(dsl::knowledge_dataset_file.find(id))
            .returning(model::DatasetFile::as_returning())
            .get_result(conn)
            .optional()
            .map_err(|e| Error::Database(e.to_string()))?
            .ok_or(Error::NotFound)
    }
}
