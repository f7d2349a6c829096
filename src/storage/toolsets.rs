//! 工具集与工具能力
use diesel::prelude::*;

use super::{model, schema, Agent, Error};

impl Agent {
    crud!(
        knowledge_toolset, id_tool_set, ToolSet, NewToolSet,
        create: create_toolset,
        find: find_toolset,
        update: update_toolset,
        list: list_toolsets,
        list_ids: list_toolset_ids,
        list_by_ids: list_toolsets_by_ids
    );

    /// 删除工具集及其全部能力
    pub fn remove_toolset(&self, id: i32) -> Result<(), Error> {
        use schema::{knowledge_toolset, knowledge_toolset_ability};
        let conn = &mut self.conn()?;
        conn.transaction::<_, Error, _>(|conn| {
            diesel::delete(
                knowledge_toolset_ability::table
                    .filter(knowledge_toolset_ability::toolset_id.eq(id)),
            )
            .execute(conn)?;
            let count = diesel::delete(knowledge_toolset::table.find(id)).execute(conn)?;
            match count {
                0 => Err(Error::NotFound),
                _ => Ok(()),
            }
        })
    }

    crud!(
        knowledge_toolset_ability, id_tool_set_ability, ToolSetAbility, NewToolSetAbility,
        create: create_ability,
        find: find_ability,
        update: update_ability,
        list: list_abilities,
        list_ids: list_ability_ids,
        list_by_ids: list_abilities_by_ids,
        remove: remove_ability
    );

    pub fn list_abilities_by_toolset(
        &self,
        toolset_id: i32,
    ) -> Result<Vec<model::ToolSetAbility>, Error> {
        use schema::knowledge_toolset_ability::dsl;
        let conn = &mut self.conn()?;
        dsl::knowledge_toolset_ability
            .filter(dsl::toolset_id.eq(toolset_id))
            .order(dsl::id_tool_set_ability.asc())
            .select(model::ToolSetAbility::as_select())
            .load(conn)
            .map_err(|e| Error::Database(e.to_string()))
    }
}
