//! 知识库数据的持久化层。所有表都以`knowledge_`为前缀，主键为自增整数。

// 为实体生成通用的增删改查方法。
// 必须定义在子模块声明之前，子模块才能使用。
macro_rules! crud {
    (
        $table:ident, $pk:ident, $model:ident, $new:ident,
        create: $create:ident,
        find: $find:ident,
        update: $update:ident,
        list: $list:ident,
        list_ids: $list_ids:ident,
        list_by_ids: $list_by_ids:ident
        $(, remove: $remove:ident)?
    ) => {
        /// 新增一条记录，返回带主键的结果
        pub fn $create(&self, item: &model::$new) -> Result<model::$model, Error> {
            let conn = &mut self.conn()?;
            diesel::insert_into(schema::$table::table)
                .values(item)
                .returning(model::$model::as_returning())
                .get_result(conn)
                .map_err(|e| Error::Database(e.to_string()))
        }

        pub fn $find(&self, id: i32) -> Result<Option<model::$model>, Error> {
            let conn = &mut self.conn()?;
            schema::$table::table
                .find(id)
                .select(model::$model::as_select())
                .first(conn)
                .optional()
                .map_err(|e| Error::Database(e.to_string()))
        }

        /// 以新内容覆盖全部字段
        pub fn $update(&self, id: i32, item: &model::$new) -> Result<model::$model, Error> {
            let conn = &mut self.conn()?;
            diesel::update(schema::$table::table.find(id))
                .set(item)
                .returning(model::$model::as_returning())
                .get_result(conn)
                .optional()
                .map_err(|e| Error::Database(e.to_string()))?
                .ok_or(Error::NotFound)
        }

        pub fn $list(&self) -> Result<Vec<model::$model>, Error> {
            let conn = &mut self.conn()?;
            schema::$table::table
                .order(schema::$table::$pk.asc())
                .select(model::$model::as_select())
                .load(conn)
                .map_err(|e| Error::Database(e.to_string()))
        }

        pub fn $list_ids(&self) -> Result<Vec<i32>, Error> {
            let conn = &mut self.conn()?;
            schema::$table::table
                .order(schema::$table::$pk.asc())
                .select(schema::$table::$pk)
                .load(conn)
                .map_err(|e| Error::Database(e.to_string()))
        }

        /// 按主键集合获取记录。不存在的主键会被忽略，结果不保证顺序。
        pub fn $list_by_ids(&self, ids: &[i32]) -> Result<Vec<model::$model>, Error> {
            let conn = &mut self.conn()?;
            schema::$table::table
                .filter(schema::$table::$pk.eq_any(ids))
                .select(model::$model::as_select())
                .load(conn)
                .map_err(|e| Error::Database(e.to_string()))
        }

        $(
            pub fn $remove(&self, id: i32) -> Result<(), Error> {
                let conn = &mut self.conn()?;
                let count = diesel::delete(schema::$table::table.find(id))
                    .execute(conn)
                    .map_err(|e| Error::Database(e.to_string()))?;
                match count {
                    0 => Err(Error::NotFound),
                    _ => Ok(()),
                }
            }
        )?
    };
}

mod agent;
mod bots;
mod datasets;
pub mod model;
mod projects;
mod schema;
mod toolsets;

pub use agent::{Agent, Error};
