//! 切换到指定应用或可启动数据库

use tracing::debug;

use crate::const_values::{
    MEM_ERR_NOT_ENOUGH_SPACE, OPEN_DB_PARAM_SIZE, SYS_APP_LAUNCH_CMD_NORMAL_LAUNCH,
    SYS_APP_LAUNCH_CMD_OPEN_DB, SYS_FILE_T_APPLICATION, SYS_FILE_T_PANEL,
};
use crate::host::{GuestCalls, GuestError, GuestResult};

/// 数据库是否可以直接启动
pub fn is_executable(db_type: u32, _creator: u32, _attributes: u16) -> bool {
    db_type == SYS_FILE_T_APPLICATION || db_type == SYS_FILE_T_PANEL
}

/// 可执行数据库直接切换；数据数据库由同创建者的应用以“打开数据库”方式启动
pub fn switch_to_app(guest: &mut dyn GuestCalls, card_no: u16, db_id: u32) -> GuestResult<()> {
    let info = guest.database_info(card_no, db_id)?;

    if is_executable(info.db_type, info.creator, info.attributes) {
        debug!(card_no, db_id = %format_args!("{:#x}", db_id), "切换到应用");
        return guest.ui_app_switch(card_no, db_id, SYS_APP_LAUNCH_CMD_NORMAL_LAUNCH, None);
    }

    let (app_card_no, app_db_id) =
        guest.next_database_by_type_creator(SYS_FILE_T_APPLICATION, info.creator)?;

    let param = guest
        .mem_ptr_new(OPEN_DB_PARAM_SIZE)
        .ok_or(GuestError(MEM_ERR_NOT_ENOUGH_SPACE))?;
    guest.mem_ptr_set_owner(param, 0);
    guest.put16(param, card_no);
    guest.put32(param + 2, db_id);

    debug!(
        app_db_id = %format_args!("{:#x}", app_db_id),
        db_id = %format_args!("{:#x}", db_id),
        "以打开数据库方式启动应用"
    );
    guest.ui_app_switch(app_card_no, app_db_id, SYS_APP_LAUNCH_CMD_OPEN_DB, Some(param))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::const_values::{DM_ERR_CANT_FIND, four_cc};
    use crate::host::DatabaseInfo;
    use crate::test_utils::MockHost;

    #[test]
    fn test_switch_to_executable() {
        let mut host = MockHost::new();
        host.databases.insert(
            (0, 0x100),
            DatabaseInfo {
                attributes: 0,
                db_type: SYS_FILE_T_APPLICATION,
                creator: four_cc(b"memo"),
            },
        );
        switch_to_app(&mut host, 0, 0x100).unwrap();
        assert_eq!(
            host.app_switches,
            vec![(0, 0x100, SYS_APP_LAUNCH_CMD_NORMAL_LAUNCH, None)]
        );
    }

    #[test]
    fn test_switch_to_data_database() {
        let mut host = MockHost::new();
        let creator = four_cc(b"memo");
        host.databases.insert(
            (0, 0x200),
            DatabaseInfo {
                attributes: 0,
                db_type: four_cc(b"DATA"),
                creator,
            },
        );
        host.apps_by_creator.insert(creator, (1, 0x900));

        switch_to_app(&mut host, 0, 0x200).unwrap();

        let param = host.allocations[0];
        assert_eq!(host.owners, vec![(param, 0)]);
        assert_eq!(host.puts16, vec![(param, 0)]);
        assert_eq!(host.puts32, vec![(param + 2, 0x200)]);
        assert_eq!(
            host.app_switches,
            vec![(1, 0x900, SYS_APP_LAUNCH_CMD_OPEN_DB, Some(param))]
        );
    }

    #[test]
    fn test_switch_errors_are_guest_codes() {
        let mut host = MockHost::new();
        assert_eq!(
            switch_to_app(&mut host, 0, 0x300),
            Err(GuestError(DM_ERR_CANT_FIND))
        );

        let creator = four_cc(b"memo");
        host.databases.insert(
            (0, 0x200),
            DatabaseInfo {
                attributes: 0,
                db_type: four_cc(b"DATA"),
                creator,
            },
        );
        host.apps_by_creator.insert(creator, (1, 0x900));
        host.alloc_fails = true;
        assert_eq!(
            switch_to_app(&mut host, 0, 0x200),
            Err(GuestError(MEM_ERR_NOT_ENOUGH_SPACE))
        );
        assert!(host.app_switches.is_empty());
    }
}
