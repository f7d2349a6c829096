//! 机器人、机器人会话、模型凭据与标签
use diesel::prelude::*;

use super::{model, schema, Agent, Error};

impl Agent {
    crud!(
        knowledge_bot, id_bots, Bot, NewBot,
        create: create_bot,
        find: find_bot,
        update: update_bot,
        list: list_bots,
        list_ids: list_bot_ids,
        list_by_ids: list_bots_by_ids
    );

    /// 新增机器人，并在同一事务中创建给定的数据集与工具集作为其引用
    pub fn create_bot_with(
        &self,
        bot: &model::NewBot,
        dataset: Option<&model::NewDataset>,
        toolset: Option<&model::NewToolSet>,
    ) -> Result<model::Bot, Error> {
        use schema::{knowledge_bot, knowledge_dataset, knowledge_toolset};
        let conn = &mut self.conn()?;
        conn.transaction::<_, Error, _>(|conn| {
            let mut bot = bot.clone();
            if let Some(dataset) = dataset {
                bot.dataset_id = diesel::insert_into(knowledge_dataset::table)
                    .values(dataset)
                    .returning(knowledge_dataset::id_dataset)
                    .get_result(conn)?;
            }
            if let Some(toolset) = toolset {
                bot.toolset_id = diesel::insert_into(knowledge_toolset::table)
                    .values(toolset)
                    .returning(knowledge_toolset::id_tool_set)
                    .get_result(conn)?;
            }
            Ok(diesel::insert_into(knowledge_bot::table)
                .values(&bot)
                .returning(model::Bot::as_returning())
                .get_result(conn)?)
        })
    }

    /// 删除机器人及其全部会话
    pub fn remove_bot(&self, id: i32) -> Result<(), Error> {
        use schema::{knowledge_bot, knowledge_bot_session};
        let conn = &mut self.conn()?;
        conn.transaction::<_, Error, _>(|conn| {
            let sessions = diesel::delete(
                knowledge_bot_session::table.filter(knowledge_bot_session::bot_id.eq(id)),
            )
            .execute(conn)?;
            let count = diesel::delete(knowledge_bot::table.find(id)).execute(conn)?;
            if count == 0 {
                return Err(Error::NotFound);
            }
            tracing::debug!("Bot {id} removed with {sessions} sessions");
            Ok(())
        })
    }

    crud!(
        knowledge_bot_session, id_bot_session, BotSession, NewBotSession,
        create: create_bot_session,
        find: find_bot_session,
        update: update_bot_session,
        list: list_bot_sessions,
        list_ids: list_bot_session_ids,
        list_by_ids: list_bot_sessions_by_ids,
        remove: remove_bot_session
    );

    pub fn find_bot_session_by_session_id(
        &self,
        session_id: &str,
    ) -> Result<Option<model::BotSession>, Error> {
        use schema::knowledge_bot_session::dsl;
        let conn = &mut self.conn()?;
        dsl::knowledge_bot_session
            .filter(dsl::session_id.eq(session_id))
            .select(model::BotSession::as_select())
            .first(conn)
            .optional()
            .map_err(|e| Error::Database(e.to_string()))
    }

    /// 查找属于某访问码的会话。会话不属于该用户时返回None。
    pub fn find_bot_session_for_user(
        &self,
        session_id: &str,
        access_code: &str,
    ) -> Result<Option<model::BotSession>, Error> {
        use schema::knowledge_bot_session::dsl;
        let conn = &mut self.conn()?;
        dsl::knowledge_bot_session
            .filter(dsl::session_id.eq(session_id))
            .filter(dsl::user_access_code.eq(access_code))
            .select(model::BotSession::as_select())
            .first(conn)
            .optional()
            .map_err(|e| Error::Database(e.to_string()))
    }

    pub fn list_bot_sessions_by_access_code(
        &self,
        access_code: &str,
    ) -> Result<Vec<model::BotSession>, Error> {
        use schema::knowledge_bot_session::dsl;
        let conn = &mut self.conn()?;
        dsl::knowledge_bot_session
            .filter(dsl::user_access_code.eq(access_code))
            .order(dsl::creation_date.desc())
            .select(model::BotSession::as_select())
            .load(conn)
            .map_err(|e| Error::Database(e.to_string()))
    }

    /// 覆盖会话的消息内容
    pub fn update_bot_session_content(&self, session_id: &str, content: &str) -> Result<(), Error> {
        use schema::knowledge_bot_session::dsl;
        let conn = &mut self.conn()?;
        let count = diesel::update(dsl::knowledge_bot_session.filter(dsl::session_id.eq(session_id)))
            .set(dsl::content.eq(content))
            .execute(conn)
            .map_err(|e| Error::Database(e.to_string()))?;
        match count {
            0 => Err(Error::NotFound),
            _ => Ok(()),
        }
    }

    crud!(
        knowledge_model, id_model, Model, NewModel,
        create: create_model,
        find: find_model,
        update: update_model,
        list: list_models,
        list_ids: list_model_ids,
        list_by_ids: list_models_by_ids,
        remove: remove_model
    );

    crud!(
        knowledge_tag, id_tags, Tag, NewTag,
        create: create_tag,
        find: find_tag,
        update: update_tag,
        list: list_tags,
        list_ids: list_tag_ids,
        list_by_ids: list_tags_by_ids,
        remove: remove_tag
    );
}

#[cfg(test)]
mod tests {
    use super::model::*;
    use super::Agent;
    use chrono::Utc;

    fn new_bot(name: &str) -> NewBot {
        NewBot {
            name: name.to_string(),
            description: "answers questions".to_string(),
            story: "You are a librarian.".to_string(),
            dataset_id: 0,
            toolset_id: 0,
            model_id: "gpt-3.5-turbo".to_string(),
            type_id: "chat".to_string(),
        }
    }

    fn new_session(bot_id: i32, session_id: &str, access_code: &str) -> NewBotSession {
        NewBotSession {
            user_id: 7,
            creation_date: Utc::now().naive_utc(),
            content: "[]".to_string(),
            bot_id,
            access_code: access_code.to_string(),
            session_id: session_id.to_string(),
        }
    }

    #[test]
    fn test_bot_crud() {
        let agent = Agent::new(":memory:").expect("Database agent should be initialized");

        let created = agent.create_bot(&new_bot("librarian")).unwrap();
        assert!(created.id > 0);
        assert_eq!(agent.find_bot(created.id).unwrap(), Some(created.clone()));

        // 更新会覆盖全部字段
        let mut changed = new_bot("archivist");
        changed.dataset_id = 3;
        changed.story = "You keep the archive.".to_string();
        let updated = agent.update_bot(created.id, &changed).unwrap();
        assert_eq!(updated.name, "archivist");
        assert_eq!(updated.dataset_id, 3);
        assert_eq!(agent.find_bot(created.id).unwrap(), Some(updated));

        agent.remove_bot(created.id).unwrap();
        assert_eq!(agent.find_bot(created.id).unwrap(), None);
        assert_eq!(agent.remove_bot(created.id), Err(super::Error::NotFound));
    }

    #[test]
    fn test_update_missing_bot() {
        let agent = Agent::new(":memory:").expect("Database agent should be initialized");
        assert_eq!(
            agent.update_bot(42, &new_bot("ghost")),
            Err(super::Error::NotFound)
        );
    }

    #[test]
    fn test_list_bots_by_ids() {
        let agent = Agent::new(":memory:").expect("Database agent should be initialized");
        let a = agent.create_bot(&new_bot("a")).unwrap();
        let b = agent.create_bot(&new_bot("b")).unwrap();
        let c = agent.create_bot(&new_bot("c")).unwrap();

        assert_eq!(agent.list_bot_ids().unwrap(), vec![a.id, b.id, c.id]);

        let mut found = agent.list_bots_by_ids(&[c.id, a.id, 999]).unwrap();
        found.sort_by_key(|x| x.id);
        assert_eq!(found, vec![a, c]);
    }

    #[test]
    fn test_create_bot_with_references() {
        let agent = Agent::new(":memory:").expect("Database agent should be initialized");
        let dataset = NewDataset {
            name: "librarian dataset".to_string(),
            ..Default::default()
        };
        let toolset = NewToolSet {
            name: "librarian toolset".to_string(),
            ..Default::default()
        };
        let bot = agent
            .create_bot_with(&new_bot("librarian"), Some(&dataset), Some(&toolset))
            .unwrap();
        let created = agent.find_dataset(bot.dataset_id).unwrap().unwrap();
        assert_eq!(created.name, "librarian dataset");
        let created = agent.find_toolset(bot.toolset_id).unwrap().unwrap();
        assert_eq!(created.name, "librarian toolset");

        // 已指定的引用保持不变
        let mut existing = new_bot("archivist");
        existing.dataset_id = bot.dataset_id;
        let other = agent.create_bot_with(&existing, None, Some(&toolset)).unwrap();
        assert_eq!(other.dataset_id, bot.dataset_id);
        assert_eq!(agent.list_datasets().unwrap().len(), 1);
        assert_eq!(agent.list_toolsets().unwrap().len(), 2);
    }

    #[test]
    fn test_remove_bot_cascades_sessions() {
        let agent = Agent::new(":memory:").expect("Database agent should be initialized");
        let bot = agent.create_bot(&new_bot("librarian")).unwrap();
        let other = agent.create_bot(&new_bot("other")).unwrap();
        agent.create_bot_session(&new_session(bot.id, "s1", "code")).unwrap();
        agent.create_bot_session(&new_session(other.id, "s2", "code")).unwrap();

        agent.remove_bot(bot.id).unwrap();

        let sessions = agent.list_bot_sessions().unwrap();
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].session_id, "s2");
    }

    #[test]
    fn test_bot_session_lookups() {
        let agent = Agent::new(":memory:").expect("Database agent should be initialized");
        let bot = agent.create_bot(&new_bot("librarian")).unwrap();
        agent.create_bot_session(&new_session(bot.id, "s1", "alice")).unwrap();
        agent.create_bot_session(&new_session(bot.id, "s2", "bob")).unwrap();

        let s1 = agent.find_bot_session_by_session_id("s1").unwrap().unwrap();
        assert_eq!(s1.access_code, "alice");
        assert!(agent.find_bot_session_for_user("s1", "alice").unwrap().is_some());
        assert!(agent.find_bot_session_for_user("s1", "bob").unwrap().is_none());
        assert_eq!(agent.list_bot_sessions_by_access_code("bob").unwrap().len(), 1);

        agent
            .update_bot_session_content("s1", r#"[{"role":"user","content":"hi"}]"#)
            .unwrap();
        let s1 = agent.find_bot_session(s1.id).unwrap().unwrap();
        assert!(s1.content.contains("hi"));

        assert_eq!(
            agent.update_bot_session_content("missing", "[]"),
            Err(super::Error::NotFound)
        );
        let s2 = agent.find_bot_session_by_session_id("s2").unwrap().unwrap();
        agent.remove_bot_session(s2.id).unwrap();
        assert!(agent.find_bot_session_by_session_id("s2").unwrap().is_none());
    }

    #[test]
    fn test_model_and_tag() {
        let agent = Agent::new(":memory:").expect("Database agent should be initialized");
        let m = agent
            .create_model(&NewModel {
                api_key: "sk-test".to_string(),
                url: "http://localhost:8080/v1".to_string(),
            })
            .unwrap();
        assert_eq!(agent.find_model(m.id).unwrap().unwrap().api_key, "sk-test");
        agent.remove_model(m.id).unwrap();
        assert!(agent.list_models().unwrap().is_empty());

        let t = agent
            .create_tag(&NewTag {
                name: "faq".to_string(),
            })
            .unwrap();
        let t = agent
            .update_tag(
                t.id,
                &NewTag {
                    name: "howto".to_string(),
                },
            )
            .unwrap();
        assert_eq!(agent.list_tags().unwrap(), vec![t]);
    }
}
