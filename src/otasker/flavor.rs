//! Per-flavor PL/SQL statement sets.
//!
//! A gateway route runs in one of three flavors (classic OWA, APEX, EKB).
//! Each flavor supplies five statements: the session-id probe, the main
//! wrapper block, the chunk drain, the session kill, and the file upload.
//! The main wrapper and the upload are templates with `{name}` slots filled
//! per request.

/// Gateway flavor selector, fixed per route by configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlavorKind {
    Classic,
    Apex,
    Ekb,
}

/// A complete statement set for one flavor.
#[derive(Debug)]
pub struct Flavor {
    pub kind: FlavorKind,
    pub eval_session_id: &'static str,
    main: &'static str,
    pub get_rest_chunk: &'static str,
    pub kill_session: &'static str,
    file_upload: &'static str,
}

impl Flavor {
    pub fn for_kind(kind: FlavorKind) -> &'static Flavor {
        match kind {
            FlavorKind::Classic => &CLASSIC,
            FlavorKind::Apex => &APEX,
            FlavorKind::Ekb => &EKB,
        }
    }

    /// Fill the main wrapper template.
    ///
    /// `declare` lands in the declaration section, `set` right after `begin`,
    /// `store` holds the parameter-store calls, `proc`/`args` form the actual
    /// procedure invocation, and `before`/`after` are the route's script
    /// snippets.
    #[allow(clippy::too_many_arguments)]
    pub fn render_main(
        &self,
        declare: &str,
        set: &str,
        before: &str,
        store: &str,
        proc: &str,
        args: &str,
        after: &str,
    ) -> String {
        self.main
            .replace("{declare}", declare)
            .replace("{set}", set)
            .replace("{before}", before)
            .replace("{store}", store)
            .replace("{proc}", proc)
            .replace("{args}", args)
            .replace("{after}", after)
    }

    /// Fill the file-upload template with the CGI-environment assignments,
    /// the route's before-script and the document table.
    pub fn render_file_upload(&self, set: &str, before: &str, document_table: &str) -> String {
        self.file_upload
            .replace("{set}", set)
            .replace("{before}", before)
            .replace("{doctable}", document_table)
    }
}

static CLASSIC: Flavor = Flavor {
    kind: FlavorKind::Classic,
    eval_session_id: "select kill_session.get_current_session_id from dual",
    main: r#"declare
  rc__ number(2,0);
  l_num_params number;
  l_param_name owa.vc_arr;
  l_param_val owa.vc_arr;
  l_num_ext_params number;
  l_ext_param_name owa.vc_arr;
  l_ext_param_val owa.vc_arr;
  l_package_name varchar2(240);
{declare}
begin
{set}
  owa.init_cgi_env(l_num_params, l_param_name, l_param_val);
  sys.owa.init_cgi_env(l_num_params, l_param_name, l_param_val);
  {before}
{store}
  {proc}({args});
  {after}
  if (wpg_docload.is_file_download) then
    rc__ := 1;
    :content__ := '';
    :bNextChunkExists := 0;
    declare
      l_doc_info varchar2(32000);
      l_lob blob := :lob__;
      l_bfile bfile;
    begin
      wpg_docload.get_download_file(l_doc_info);
      if l_doc_info='B' then
        A.hrslt.GET_INFO(:ContentType, :ContentLength, :CustomHeaders);
        wpg_docload.get_download_blob(l_lob);
        :lob__ := l_lob;
      elsif l_doc_info='F' then
        A.hrslt.GET_INFO(:ContentType, :ContentLength, :CustomHeaders);
        wpg_docload.get_download_bfile(l_bfile);
        DBMS_LOB.LOADFROMFILE(l_lob, l_bfile, DBMS_LOB.getLength(l_bfile));
        :lob__ := l_lob;
      else
        declare
          l_len number;
          l_fn varchar2(32000);
          l_ct varchar2(4000);
          p_doctable varchar2(32000);
          sql_stmt varchar2(32000);
          cursor_handle INTEGER;
          retval INTEGER;
        begin
          l_len := to_number('0'||substr(l_doc_info,1, instr(l_doc_info,'X', 1)-1));
          l_fn := substr(l_doc_info, instr(l_doc_info,'X', 1)+1, l_len);
          p_doctable := owa_util.get_cgi_env('DOCUMENT_TABLE');
          IF (p_doctable IS NULL) THEN
             p_doctable := 'wwv_document';
          END IF;
          sql_stmt := 'select nvl(MIME_TYPE,CONTENT_TYPE), blob_content from '||p_doctable||
            ' where NAME=:docname';
          cursor_handle := dbms_sql.open_cursor;
          dbms_sql.parse(cursor_handle, sql_stmt, dbms_sql.v7);
          dbms_sql.define_column(cursor_handle, 1, l_ct, 128);
          dbms_sql.define_column(cursor_handle, 2, l_lob);
          dbms_sql.bind_variable(cursor_handle, ':docname', l_fn);
          retval := dbms_sql.execute_and_fetch(cursor_handle, TRUE);
          dbms_sql.column_value(cursor_handle, 1, l_ct);
          dbms_sql.column_value(cursor_handle, 2, l_lob);
          dbms_sql.close_cursor(cursor_handle);
          :ContentType := l_ct;
          :ContentLength := dbms_lob.getlength(l_lob);
          :CustomHeaders := '';
          :lob__ := l_lob;
        end;
      end if;
    end;
    commit;
    dbms_session.modify_package_state(dbms_session.reinitialize);
  else
    rc__ := 0;
    commit;
    A.hrslt.GET_INFO(:ContentType, :ContentLength, :CustomHeaders);
    :content__ := A.hrslt.GET32000(:bNextChunkExists);
    if :bNextChunkExists = 0 then
      dbms_session.modify_package_state(dbms_session.reinitialize);
    end if;
  end if;
  commit;
  :rc__ := rc__;
  :sqlerrcode := 0;
  :sqlerrm := '';
  :sqlerrtrace := '';
exception
  when others then
    rollback;
    :sqlerrcode := SQLCODE;
    :sqlerrm := sqlerrm;
    :sqlerrtrace := DBMS_UTILITY.FORMAT_ERROR_BACKTRACE();
end;"#,
    get_rest_chunk: r#"begin
  :Data := A.hrslt.GET32000(:bNextChunkExists);
  if :bNextChunkExists = 0 then
    dbms_session.modify_package_state(dbms_session.reinitialize);
  end if;
  commit;
  :sqlerrcode := 0;
  :sqlerrm := '';
  :sqlerrtrace := '';
exception
  when others then
    rollback;
    :sqlerrcode := SQLCODE;
    :sqlerrm := sqlerrm;
    :sqlerrtrace := DBMS_UTILITY.FORMAT_ERROR_BACKTRACE();
end;"#,
    kill_session: r#"begin
  kill_session.session_id := :sess_id;
  :ret := kill_session.kill_session_by_session_id(:out_err_msg);
exception
  when others then
    if sqlcode = -00031 then
      :ret := 1;
    else
      :ret := 0;
      :out_err_msg := sqlerrm;
    end if;
end;"#,
    file_upload: r#"declare
  l_num_params number;
  l_param_name owa.vc_arr;
  l_param_val owa.vc_arr;
  l_item_id varchar2(40) := :item_id;
  l_application_id varchar2(40) := :application_id;
  l_page_id varchar2(40) := :page_id;
  l_session_id varchar2(40) := :session_id;
  l_request varchar2(40) := :request;
begin
{set}
  owa.init_cgi_env(l_num_params, l_param_name, l_param_val);
  {before}
  insert into {doctable}(name, mime_type, doc_size, last_updated, content_type, blob_content, pt_dc_id)
  values(:name, :mime_type, :doc_size, sysdate, :content_type, :lob, pt_dc_by_user());
  :ret_name := :name;
  :sqlerrcode := 0;
  :sqlerrm := '';
  :sqlerrtrace := '';
exception
  when others then
    rollback;
    :sqlerrcode := -20000;
    :sqlerrm := 'Unable to upload file "'||:name||'" '||sqlerrm;
    :sqlerrtrace := DBMS_UTILITY.FORMAT_ERROR_BACKTRACE();
end;"#,
};

static APEX: Flavor = Flavor {
    kind: FlavorKind::Apex,
    eval_session_id: "select kill_session.get_current_session_id from dual",
    main: r#"declare
  rc__ number(2,0);
  l_num_params number;
  l_param_name owa.vc_arr;
  l_param_val owa.vc_arr;
  l_num_ext_params number;
  l_ext_param_name owa.vc_arr;
  l_ext_param_val owa.vc_arr;
  l_package_name varchar2(240);
{declare}
begin
{set}
  {before}
  owa.init_cgi_env(l_num_params, l_param_name, l_param_val);
{store}
  {proc}({args});
  {after}
  if (wpg_docload.is_file_download) then
    rc__ := 1;
    :content__ := '';
    :bNextChunkExists := 0;
    declare
      l_doc_info varchar2(32000);
      l_lob blob := :lob__;
      l_bfile bfile;
    begin
      wpg_docload.get_download_file(l_doc_info);
      if l_doc_info='B' then
        apex_public_user.hrslt.GET_INFO(:ContentType, :ContentLength, :CustomHeaders);
        wpg_docload.get_download_blob(l_lob);
        :lob__ := l_lob;
      elsif l_doc_info='F' then
        apex_public_user.hrslt.GET_INFO(:ContentType, :ContentLength, :CustomHeaders);
        wpg_docload.get_download_bfile(l_bfile);
        DBMS_LOB.LOADFROMFILE(l_lob, l_bfile, DBMS_LOB.getLength(l_bfile));
        :lob__ := l_lob;
      else
        declare
          l_len number;
          l_fn varchar2(32000);
          l_ct varchar2(4000);
          p_doctable varchar2(32000);
          sql_stmt varchar2(32000);
          cursor_handle INTEGER;
          retval INTEGER;
        begin
          l_len := to_number('0'||substr(l_doc_info,1, instr(l_doc_info,'X', 1)-1));
          l_fn := substr(l_doc_info, instr(l_doc_info,'X', 1)+1, l_len);
          p_doctable := owa_util.get_cgi_env('DOCUMENT_TABLE');
          IF (p_doctable IS NULL) THEN
             p_doctable := 'wwv_document';
          END IF;
          sql_stmt := 'select nvl(MIME_TYPE,CONTENT_TYPE), blob_content from '||p_doctable||
            ' where NAME=:docname';
          cursor_handle := dbms_sql.open_cursor;
          dbms_sql.parse(cursor_handle, sql_stmt, dbms_sql.v7);
          dbms_sql.define_column(cursor_handle, 1, l_ct, 128);
          dbms_sql.define_column(cursor_handle, 2, l_lob);
          dbms_sql.bind_variable(cursor_handle, ':docname', l_fn);
          retval := dbms_sql.execute_and_fetch(cursor_handle, TRUE);
          dbms_sql.column_value(cursor_handle, 1, l_ct);
          dbms_sql.column_value(cursor_handle, 2, l_lob);
          dbms_sql.close_cursor(cursor_handle);
          :ContentType := l_ct;
          :ContentLength := dbms_lob.getlength(l_lob);
          :CustomHeaders := '';
          :lob__ := l_lob;
        end;
      end if;
    end;
    commit;
    dbms_session.modify_package_state(dbms_session.reinitialize);
  else
    rc__ := 0;
    commit;
    apex_public_user.hrslt.GET_INFO(:ContentType, :ContentLength, :CustomHeaders);
    :content__ := apex_public_user.hrslt.GET32000(:bNextChunkExists);
    if :bNextChunkExists = 0 then
      dbms_session.modify_package_state(dbms_session.reinitialize);
    end if;
  end if;
  commit;
  :rc__ := rc__;
  :sqlerrcode := 0;
  :sqlerrm := '';
  :sqlerrtrace := '';
exception
  when others then
    rollback;
    :sqlerrcode := SQLCODE;
    :sqlerrm := sqlerrm;
    :sqlerrtrace := DBMS_UTILITY.FORMAT_ERROR_BACKTRACE();
end;"#,
    get_rest_chunk: r#"begin
  :Data := apex_public_user.hrslt.GET32000(:bNextChunkExists);
  if :bNextChunkExists = 0 then
    dbms_session.modify_package_state(dbms_session.reinitialize);
  end if;
  commit;
  :sqlerrcode := 0;
  :sqlerrm := '';
  :sqlerrtrace := '';
exception
  when others then
    rollback;
    :sqlerrcode := SQLCODE;
    :sqlerrm := sqlerrm;
    :sqlerrtrace := DBMS_UTILITY.FORMAT_ERROR_BACKTRACE();
end;"#,
    kill_session: r#"begin
  kill_session.session_id := :sess_id;
  :ret := kill_session.kill_session_by_session_id(:out_err_msg);
exception
  when others then
    if sqlcode = -00031 then
      :ret := 1;
    else
      :ret := 0;
      :out_err_msg := sqlerrm;
    end if;
end;"#,
    file_upload: r#"declare
  l_num_params number;
  l_param_name owa.vc_arr;
  l_param_val owa.vc_arr;
  l_doc_size number := :doc_size;
  l_content_type varchar2(240) := :content_type;
begin
{set}
  owa.init_cgi_env(l_num_params, l_param_name, l_param_val);
  :ret_name := apex_util.set_blob
                (
                  p_file_name => :name
                  ,p_mime_type => :mime_type
                  ,p_blob_content => :lob
                  ,p_item_id => :item_id
                  ,p_application_id => :application_id
                  ,p_page_id => :page_id
                  ,p_session_id => :session_id
                  ,p_request => :request
                );
  :sqlerrcode := 0;
  :sqlerrm := '';
  :sqlerrtrace := '';
exception
  when others then
    rollback;
    :sqlerrcode := -20000;
    :sqlerrm := 'Unable to upload file "'||:name||'" '||sqlerrm;
    :sqlerrtrace := DBMS_UTILITY.FORMAT_ERROR_BACKTRACE();
end;"#,
};

static EKB: Flavor = Flavor {
    kind: FlavorKind::Ekb,
    eval_session_id: "select wskill_session.e_gcurrent_session_id from dual",
    main: r#"declare
  rc__ number(2,0);
  l_num_params number;
  l_param_name wscontext.et_vc_arr;
  l_param_val wscontext.et_vc_arr;
  l_num_ext_params number;
  l_ext_param_name wscontext.et_vc_arr;
  l_ext_param_val wscontext.et_vc_arr;
  l_package_name varchar2(240);
{declare}
begin
{set}
  {before}
  wscontext.e_init_cgi_env(l_num_params, l_param_name, l_param_val);
  wscontext.e_store_external_parameters(l_package_name, l_num_ext_params, l_ext_param_name, l_ext_param_val);
{store}
  {proc}({args});
  {after}
  if (wsp.e_gIsFileDownload) then
    rc__ := 1;
    :content__ := '';
    declare
      l_lob blob := :lob__;
    begin
      :ContentType := '';
      :ContentLength := wsp.e_gContentLength;
      :CustomHeaders := wsp.e_gHTMLHdrs;
      wsp.e_Download_blob(l_lob);
      :lob__ := l_lob;
      :bNextChunkExists := 0;
    end;
    commit;
    dbms_session.modify_package_state(dbms_session.reinitialize);
  else
    rc__ := 0;
    commit;
    :ContentType := '';
    :ContentLength := wsp.e_gContentLength;
    :CustomHeaders := wsp.e_gHTMLHdrs;
    :content__ := wsp.e_gContentChunk(32000, :bNextChunkExists);
    if :bNextChunkExists = 0 then
      dbms_session.modify_package_state(dbms_session.reinitialize);
    end if;
  end if;
  commit;
  :rc__ := rc__;
  :sqlerrcode := 0;
  :sqlerrm := '';
  :sqlerrtrace := '';
exception
  when others then
    rollback;
    :sqlerrcode := SQLCODE;
    :sqlerrm := sqlerrm;
    :sqlerrtrace := DBMS_UTILITY.FORMAT_ERROR_BACKTRACE();
end;"#,
    get_rest_chunk: r#"begin
  :Data := wsp.e_gContentChunk(32000, :bNextChunkExists);
  if :bNextChunkExists = 0 then
    dbms_session.modify_package_state(dbms_session.reinitialize);
  end if;
  commit;
  :sqlerrcode := 0;
  :sqlerrm := '';
  :sqlerrtrace := '';
exception
  when others then
    rollback;
    :sqlerrcode := SQLCODE;
    :sqlerrm := sqlerrm;
    :sqlerrtrace := DBMS_UTILITY.FORMAT_ERROR_BACKTRACE();
end;"#,
    kill_session: r#"begin
  wskill_session.ev_Session_ID := :sess_id;
  :ret := wskill_session.e_kill_session_by_session_id(:out_err_msg);
exception
  when others then
    if sqlcode = -00031 then
      :ret := 1;
    else
      :ret := 0;
      :out_err_msg := sqlerrm;
    end if;
end;"#,
    file_upload: r#"declare
  l_num_params number;
  l_param_name owa.vc_arr;
  l_param_val owa.vc_arr;
  l_item_id varchar2(40) := :item_id;
  l_application_id varchar2(40) := :application_id;
  l_page_id varchar2(40) := :page_id;
  l_session_id varchar2(40) := :session_id;
  l_request varchar2(40) := :request;
  l_mime_type varchar2(240) := :mime_type;
begin
{set}
  owa.init_cgi_env(l_num_params, l_param_name, l_param_val);
  {before}
  insert into {doctable}(name, doc_size, last_updated, content_type, blob_content, PTDCD_ID)
  values(:name, :doc_size, sysdate, :content_type, :lob, pt_dc_by_user());
  :ret_name := :name;
  :sqlerrcode := 0;
  :sqlerrm := '';
  :sqlerrtrace := '';
exception
  when others then
    rollback;
    :sqlerrcode := -20000;
    :sqlerrm := 'Unable to upload file "'||:name||'" '||sqlerrm;
    :sqlerrtrace := DBMS_UTILITY.FORMAT_ERROR_BACKTRACE();
end;"#,
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_main_fills_all_slots() {
        let f = Flavor::for_kind(FlavorKind::Classic);
        let stm = f.render_main(
            "  l_ap varchar2(1);\n",
            "  l_num_params := 0;\n",
            "",
            "",
            "test_p",
            "ap => :ap",
            "",
        );
        assert!(stm.contains("l_ap varchar2(1);"));
        assert!(stm.contains("test_p(ap => :ap);"));
        assert!(!stm.contains('{'));
    }

    #[test]
    fn render_file_upload_substitutes_document_table() {
        let f = Flavor::for_kind(FlavorKind::Ekb);
        let stm = f.render_file_upload("  l_num_params := 0;\n", "null;", "wwv_document");
        assert!(stm.contains("insert into wwv_document("));
        assert!(stm.contains("l_num_params := 0;"));
        assert!(stm.contains("null;"));
        assert!(!stm.contains("{doctable}"));
    }

    #[test]
    fn apex_upload_substitutes_cgi_env_assignments() {
        let f = Flavor::for_kind(FlavorKind::Apex);
        let stm = f.render_file_upload("  l_param_name(1) := 'REQUEST_METHOD';\n", "", "ignored");
        assert!(stm.contains("apex_util.set_blob"));
        assert!(stm.contains("l_param_name(1) := 'REQUEST_METHOD';"));
        assert!(!stm.contains("{set}"));
    }
}
