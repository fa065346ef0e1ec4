use std::collections::{HashMap, HashSet};

use tracing::{info, warn};
use uuid::Uuid;

use crate::error::AppError;
use crate::projects::repo_types::{Authorization, NewProject, Organization, Project, ProjectView};
use crate::store::Store;
use crate::users::repo_types::User;

/// Owner, authorized member of the project's organization, or admin.
pub fn can_view(viewer: &User, project: &Project, authorized_orgs: &HashSet<Uuid>) -> bool {
    if viewer.is_admin() {
        return true;
    }
    project.user_id == viewer.id
        || project
            .organization_id
            .is_some_and(|org| authorized_orgs.contains(&org))
}

/// Keeps the projects `viewer` may see, preserving input order.
pub fn filter_visible<I>(
    viewer: &User,
    projects: I,
    authorized_orgs: &HashSet<Uuid>,
) -> Vec<Project>
where
    I: IntoIterator<Item = Project>,
{
    projects
        .into_iter()
        .filter(|p| can_view(viewer, p, authorized_orgs))
        .collect()
}

async fn authorized_orgs(store: &dyn Store, user_id: Uuid) -> Result<HashSet<Uuid>, AppError> {
    Ok(store
        .authorized_organization_ids(user_id)
        .await?
        .into_iter()
        .collect())
}

/// Loads a project, reporting invisible projects exactly like missing ones.
pub async fn find_visible_project(
    store: &dyn Store,
    viewer: &User,
    project_id: Uuid,
) -> Result<Project, AppError> {
    let project = store
        .find_project(project_id)
        .await?
        .ok_or(AppError::NotFound("project"))?;
    ensure_visible(store, viewer, &project).await?;
    Ok(project)
}

pub async fn ensure_visible(
    store: &dyn Store,
    viewer: &User,
    project: &Project,
) -> Result<(), AppError> {
    if viewer.is_admin() || project.user_id == viewer.id {
        return Ok(());
    }
    let orgs = authorized_orgs(store, viewer.id).await?;
    if can_view(viewer, project, &orgs) {
        Ok(())
    } else {
        warn!(user_id = %viewer.id, project_id = %project.id, "project hidden from viewer");
        Err(AppError::NotFound("project"))
    }
}

/// Attach each project's owner, projected to its public attributes.
pub async fn project_views(
    store: &dyn Store,
    projects: Vec<Project>,
) -> Result<Vec<ProjectView>, AppError> {
    let mut owners = HashMap::new();
    let mut views = Vec::with_capacity(projects.len());
    for project in projects {
        if !owners.contains_key(&project.user_id) {
            let user = store
                .find_user(project.user_id)
                .await?
                .ok_or(AppError::NotFound("user"))?;
            owners.insert(project.user_id, user.public());
        }
        let owner = owners[&project.user_id].clone();
        views.push(ProjectView::new(project, owner));
    }
    Ok(views)
}

/// The creator owns the organization and is authorized on it.
pub async fn create_organization(
    store: &dyn Store,
    owner: &User,
    name: &str,
) -> Result<Organization, AppError> {
    let name = name.trim();
    if name.is_empty() {
        return Err(AppError::validation("name", "can't be blank"));
    }
    let org = store.insert_organization(name, owner.id).await?;
    store.grant_authorization(owner.id, org.id).await?;
    info!(organization_id = %org.id, user_id = %owner.id, "organization created");
    Ok(org)
}

/// Only the organization owner or an admin may grant access.
pub async fn grant_authorization(
    store: &dyn Store,
    granter: &User,
    organization_id: Uuid,
    user_id: Uuid,
) -> Result<Authorization, AppError> {
    let org = store
        .find_organization(organization_id)
        .await?
        .filter(|o| granter.is_admin() || o.user_id == granter.id)
        .ok_or(AppError::NotFound("organization"))?;
    store
        .find_user(user_id)
        .await?
        .ok_or(AppError::NotFound("user"))?;
    let auth = store.grant_authorization(user_id, org.id).await?;
    info!(organization_id = %org.id, %user_id, granted_by = %granter.id, "authorization granted");
    Ok(auth)
}

pub async fn create_project(
    store: &dyn Store,
    owner: &User,
    name: &str,
    organization_id: Option<Uuid>,
) -> Result<Project, AppError> {
    let name = name.trim();
    if name.is_empty() {
        return Err(AppError::validation("name", "can't be blank"));
    }
    if let Some(org_id) = organization_id {
        let visible = owner.is_admin() || authorized_orgs(store, owner.id).await?.contains(&org_id);
        if !visible {
            return Err(AppError::NotFound("organization"));
        }
    }
    let project = store
        .insert_project(NewProject {
            name: name.to_string(),
            user_id: owner.id,
            organization_id,
        })
        .await?;
    info!(project_id = %project.id, user_id = %owner.id, "project created");
    Ok(project)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use crate::users::repo_types::{NewUser, NON_SENSITIVE_ATTRIBUTES};
    use crate::users::services::{build_user, key_order, serializable_attributes};
    use pretty_assertions::assert_eq;
    use time::OffsetDateTime;

    async fn user(store: &MemoryStore, handle: &str) -> User {
        let user = build_user(NewUser {
            name: handle.into(),
            email: format!("{handle}@example.com"),
            github_handle: Some(handle.into()),
            admin: false,
        })
        .unwrap();
        store.insert_user(user).await.unwrap()
    }

    fn project(owner: Uuid, org: Option<Uuid>) -> Project {
        Project {
            id: Uuid::new_v4(),
            name: "rails/rails".into(),
            user_id: owner,
            organization_id: org,
            created_at: OffsetDateTime::now_utc(),
        }
    }

    fn plain_user(admin: bool) -> User {
        User {
            id: Uuid::new_v4(),
            name: "someone".into(),
            email: "someone@example.com".into(),
            github_handle: "someone".into(),
            api_key: "key".into(),
            admin,
            created_at: OffsetDateTime::now_utc(),
        }
    }

    #[test]
    fn can_view_owned_authorized_and_admin() {
        let viewer = plain_user(false);
        let org = Uuid::new_v4();
        let orgs = HashSet::from([org]);

        assert!(can_view(&viewer, &project(viewer.id, None), &HashSet::new()));
        assert!(can_view(&viewer, &project(Uuid::new_v4(), Some(org)), &orgs));
        assert!(!can_view(&viewer, &project(Uuid::new_v4(), Some(Uuid::new_v4())), &orgs));
        assert!(!can_view(&viewer, &project(Uuid::new_v4(), None), &orgs));
        assert!(can_view(&plain_user(true), &project(Uuid::new_v4(), None), &HashSet::new()));
    }

    #[tokio::test]
    async fn includes_projects_the_user_owns() {
        let store = MemoryStore::new();
        let owner = user(&store, "yanbonnel").await;
        let p = create_project(&store, &owner, "rails/rails", None).await.unwrap();

        let visible = store.visible_projects(&owner).await.unwrap();
        assert_eq!(visible, vec![p]);
    }

    #[tokio::test]
    async fn does_not_include_projects_from_other_users() {
        let store = MemoryStore::new();
        let owner = user(&store, "yanbonnel").await;
        let other = user(&store, "rchoquet").await;
        let mine = create_project(&store, &owner, "mine", None).await.unwrap();
        create_project(&store, &other, "theirs", None).await.unwrap();

        assert_eq!(store.visible_projects(&owner).await.unwrap(), vec![mine]);
    }

    #[tokio::test]
    async fn user_without_projects_sees_nothing() {
        let store = MemoryStore::new();
        let owner = user(&store, "yanbonnel").await;
        let lonely = user(&store, "lonely").await;
        create_project(&store, &owner, "mine", None).await.unwrap();

        assert!(store.visible_projects(&lonely).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn returns_all_projects_when_the_user_is_an_admin() {
        let store = MemoryStore::new();
        let owner = user(&store, "yanbonnel").await;
        let mut admin = user(&store, "admin").await;
        let p1 = create_project(&store, &owner, "one", None).await.unwrap();
        let p2 = create_project(&store, &admin, "two", None).await.unwrap();
        admin.admin = true;

        let mut ids: Vec<Uuid> = store
            .visible_projects(&admin)
            .await
            .unwrap()
            .into_iter()
            .map(|p| p.id)
            .collect();
        ids.sort();
        let mut expected = vec![p1.id, p2.id];
        expected.sort();
        assert_eq!(ids, expected);
    }

    #[tokio::test]
    async fn authorization_exposes_organization_projects() {
        let store = MemoryStore::new();
        let yan = user(&store, "yanbonnel").await;
        let maintainer = user(&store, "maintainer").await;
        let org = create_organization(&store, &yan, "rails").await.unwrap();
        // project owned by someone else, filed under yan's organization
        let p = store
            .insert_project(NewProject {
                name: "rails/rails".into(),
                user_id: maintainer.id,
                organization_id: Some(org.id),
            })
            .await
            .unwrap();

        assert_eq!(store.visible_projects(&yan).await.unwrap(), vec![p.clone()]);
        assert!(find_visible_project(&store, &yan, p.id).await.is_ok());

        let outsider = user(&store, "outsider").await;
        assert!(store.visible_projects(&outsider).await.unwrap().is_empty());
        assert!(matches!(
            find_visible_project(&store, &outsider, p.id).await,
            Err(AppError::NotFound("project"))
        ));

        grant_authorization(&store, &yan, org.id, outsider.id).await.unwrap();
        assert_eq!(store.visible_projects(&outsider).await.unwrap(), vec![p]);
    }

    #[tokio::test]
    async fn only_owner_can_grant_authorizations() {
        let store = MemoryStore::new();
        let yan = user(&store, "yanbonnel").await;
        let other = user(&store, "rchoquet").await;
        let org = create_organization(&store, &yan, "rails").await.unwrap();

        let err = grant_authorization(&store, &other, org.id, other.id)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::NotFound("organization")));
    }

    #[tokio::test]
    async fn cannot_file_project_under_foreign_organization() {
        let store = MemoryStore::new();
        let yan = user(&store, "yanbonnel").await;
        let other = user(&store, "rchoquet").await;
        let org = create_organization(&store, &yan, "rails").await.unwrap();

        let err = create_project(&store, &other, "sneaky", Some(org.id))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::NotFound("organization")));
    }

    #[tokio::test]
    async fn embedded_owner_does_not_leak_sensitive_attributes() {
        let store = MemoryStore::new();
        let owner = user(&store, "yanbonnel").await;
        let p = create_project(&store, &owner, "rails/rails", None).await.unwrap();

        let views = project_views(&store, vec![p]).await.unwrap();
        let json = serde_json::to_value(&views[0]).unwrap();
        assert_eq!(
            json["user"].as_object().unwrap().len(),
            NON_SENSITIVE_ATTRIBUTES.len()
        );

        let text = serde_json::to_string(&views[0]).unwrap();
        let embedded = &text[text.find("\"user\":").unwrap()..];
        assert_eq!(key_order(embedded), serializable_attributes(&owner));
        assert!(!json.to_string().contains(&owner.api_key));
    }
}
